use std::fs::{self, File};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};

use flate2::read::GzDecoder;
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use walkdir::WalkDir;

use super::abi::AbiTag;
use crate::error::LoadError;

/// Loads native modules by name.
pub trait NativeModuleLoader: Send + Sync + 'static {
    /// Handle to a loaded module.
    type Module: Send + 'static;

    /// Loads the module.
    fn load(&self, name: &str) -> Result<Self::Module, LoadError>;

    /// Finds the directory the module is installed in.
    fn resolve(&self, name: &str) -> Option<PathBuf>;
}

/// The command that rebuilds a native module in its installed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    /// Executable.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
}

impl BuildCommand {
    /// `cargo build --release`, if cargo is on the `PATH`.
    pub fn cargo() -> Option<BuildCommand> {
        let program = which::which("cargo").ok()?;
        Some(BuildCommand {
            program,
            args: vec!["build".into(), "--release".into()],
        })
    }
}

/// What to load and where to look for replacements.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Name of the module.
    pub module_name: String,
    /// The installed directory, if already known.
    pub module_path: Option<PathBuf>,
    /// Root of the precompiled archives.
    pub precompiled_root: Option<PathBuf>,
    /// Where archives are unpacked. (defaults to the OS temp dir)
    pub scratch_dir: PathBuf,
    /// Overrides the rebuild command. (defaults to `cargo build --release`)
    pub build_command: Option<BuildCommand>,
    /// Overrides the detected ABI tag.
    pub abi_tag: Option<AbiTag>,
}

impl LoaderOptions {
    /// Options for `module_name` with everything else defaulted.
    pub fn new(module_name: impl Into<String>) -> LoaderOptions {
        LoaderOptions {
            module_name: module_name.into(),
            module_path: None,
            precompiled_root: None,
            scratch_dir: std::env::temp_dir(),
            build_command: None,
            abi_tag: None,
        }
    }

    /// Sets the directory precompiled archives are looked up in.
    #[must_use]
    pub fn with_precompiled_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.precompiled_root = Some(root.into());
        self
    }

    /// Sets the scratch directory.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Sets the rebuild command.
    #[must_use]
    pub fn with_build_command(mut self, command: BuildCommand) -> Self {
        self.build_command = Some(command);
        self
    }
}

/// The single result of a load request.
#[derive(Debug)]
pub enum LoadOutcome<M> {
    /// The module is available.
    Loaded(M),
    /// All strategies are exhausted, the capability stays unavailable.
    Failed,
}

impl<M> LoadOutcome<M> {
    /// Whether the module was loaded.
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded(_))
    }

    /// The module, if loaded.
    pub fn into_module(self) -> Option<M> {
        match self {
            LoadOutcome::Loaded(module) => Some(module),
            LoadOutcome::Failed => None,
        }
    }
}

/// Resolves to the [`LoadOutcome`] of a load request.
#[derive(Debug)]
pub struct LoadHandle<M> {
    receiver: oneshot::Receiver<LoadOutcome<M>>,
}

impl<M> Future for LoadHandle<M> {
    type Output = LoadOutcome<M>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(LoadOutcome::Failed))
    }
}

/// The ways of changing what is on disk before loading again, in the order
/// they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMechanism {
    /// Unpack a precompiled build for this ABI over the installed module.
    CopyPrecompiled,
    /// Rebuild the module in place.
    Rebuild,
}

impl RetryMechanism {
    /// All mechanisms in order.
    pub const ALL: [RetryMechanism; 2] = [RetryMechanism::CopyPrecompiled, RetryMechanism::Rebuild];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Disk state changed, load again.
    Retry,
    /// Nothing changed, go on with the next mechanism.
    Skip,
}

/// State of one load request.
#[derive(Debug, Clone)]
pub struct LoadAttempt {
    /// Name of the module.
    pub module_name: String,
    /// Index of the next retry mechanism.
    pub strategy_index: usize,
    /// Installed directory of the module, once known.
    pub resolved_path: Option<PathBuf>,
    /// The ABI tag used to pick a precompiled build, once known.
    pub abi_tag: Option<AbiTag>,
}

/// Loads an optional native module, trying to repair the installation when
/// the first attempt fails.
///
/// Failing to load is never fatal: the outcome is [`LoadOutcome::Failed`]
/// and the caller goes on without the module.
#[derive(Debug)]
pub struct ResilientLoader<L> {
    loader: Arc<L>,
    options: Arc<LoaderOptions>,
}

impl<L> Clone for ResilientLoader<L> {
    fn clone(&self) -> Self {
        ResilientLoader {
            loader: self.loader.clone(),
            options: self.options.clone(),
        }
    }
}

impl<L: NativeModuleLoader> ResilientLoader<L> {
    /// Creates a loader.
    pub fn new(loader: L, options: LoaderOptions) -> ResilientLoader<L> {
        ResilientLoader {
            loader: Arc::new(loader),
            options: Arc::new(options),
        }
    }

    /// Requests loading the module.
    ///
    /// The first attempt happens on a runtime task, never within this call.
    /// Outside of a tokio runtime the handle resolves to
    /// [`LoadOutcome::Failed`].
    pub fn request_load(&self) -> LoadHandle<L::Module> {
        let (sender, receiver) = oneshot::channel();
        match Handle::try_current() {
            Ok(handle) => {
                let this = self.clone();
                handle.spawn(async move {
                    let outcome = this.run().await;
                    // the caller may have dropped the handle
                    let _ = sender.send(outcome);
                });
            }
            Err(_) => {
                log::warn!(
                    "Cannot load native module {} outside of a tokio runtime.",
                    self.options.module_name
                );
                let _ = sender.send(LoadOutcome::Failed);
            }
        }
        LoadHandle { receiver }
    }

    async fn run(&self) -> LoadOutcome<L::Module> {
        let name = &self.options.module_name;
        let mut attempt = LoadAttempt {
            module_name: name.clone(),
            strategy_index: 0,
            resolved_path: self.options.module_path.clone(),
            abi_tag: None,
        };
        let mut skip = false;

        loop {
            let number = attempt.strategy_index + 1;
            if skip {
                log::debug!("Skipping attempt {} to load native module {}.", number, name);
            } else {
                log::debug!("Attempt {} to load native module {}.", number, name);
                let loader = self.loader.clone();
                let module_name = name.clone();
                let loaded = tokio::task::spawn_blocking(move || loader.load(&module_name))
                    .await
                    .unwrap_or_else(|err| Err(err.into()));
                match loaded {
                    Ok(module) => {
                        log::debug!(
                            "Attempt {} to load native module {} has been successful.",
                            number,
                            name
                        );
                        return LoadOutcome::Loaded(module);
                    }
                    Err(err) => log::debug!(
                        "Attempt {} to load native module {} has failed: {}",
                        number,
                        name,
                        err
                    ),
                }
            }

            let module_path = match attempt.resolved_path.clone() {
                Some(path) => path,
                None => match self.loader.resolve(name) {
                    Some(path) => {
                        attempt.resolved_path = Some(path.clone());
                        path
                    }
                    None => {
                        log::warn!(
                            "Could not find the location of native module {}, no retry attempted.",
                            name
                        );
                        return LoadOutcome::Failed;
                    }
                },
            };

            let step = match RetryMechanism::ALL.get(attempt.strategy_index) {
                Some(RetryMechanism::CopyPrecompiled) => {
                    self.copy_precompiled(&mut attempt, &module_path).await
                }
                Some(RetryMechanism::Rebuild) => self.rebuild(&module_path).await,
                None => {
                    log::warn!("Native module {} could not be loaded.", name);
                    return LoadOutcome::Failed;
                }
            };
            attempt.strategy_index += 1;
            skip = step == Step::Skip;
        }
    }

    async fn copy_precompiled(&self, attempt: &mut LoadAttempt, module_path: &Path) -> Step {
        let name = &self.options.module_name;
        let tag = match self.options.abi_tag.clone().or_else(AbiTag::detect) {
            Some(tag) => tag,
            None => {
                log::warn!("Could not determine ABI version.");
                return Step::Skip;
            }
        };
        attempt.abi_tag = Some(tag.clone());

        let root = match &self.options.precompiled_root {
            Some(root) => root,
            None => {
                log::info!("No precompiled versions are configured for {} {}.", name, tag);
                return Step::Skip;
            }
        };
        let archive = tag.archive_path(root, name);
        match tokio::fs::metadata(&archive).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("A precompiled version for {} is not available {}.", name, tag);
                return Step::Skip;
            }
            Err(err) => {
                log::warn!(
                    "Looking for a precompiled version for {} {} failed: {}",
                    name,
                    tag,
                    err
                );
                return Step::Skip;
            }
        }

        log::info!("Found a precompiled version for {} {}, unpacking.", name, tag);
        let scratch = self.options.scratch_dir.clone();
        let unpacked = scratch.join(name);
        let stale = unpacked.clone();
        if let Err(err) = run_blocking(move || unpack(&archive, &scratch, &stale)).await {
            log::warn!(
                "Unpacking the precompiled build for {} {} failed: {}",
                name,
                tag,
                err
            );
            return Step::Skip;
        }

        let target = module_path.to_owned();
        if let Err(err) = run_blocking(move || copy_tree(&unpacked, &target)).await {
            log::warn!(
                "Copying the precompiled build for {} {} failed: {}",
                name,
                tag,
                err
            );
            return Step::Skip;
        }
        Step::Retry
    }

    async fn rebuild(&self, module_path: &Path) -> Step {
        let command = match self.options.build_command.clone().or_else(BuildCommand::cargo) {
            Some(command) => command,
            None => {
                log::warn!(
                    "Could not find a build toolchain to rebuild {} on demand.",
                    self.options.module_name
                );
                return Step::Skip;
            }
        };

        log::info!(
            "Rebuilding {} via {}.",
            module_path.display(),
            command.program.display()
        );
        let output = Command::new(&command.program)
            .args(&command.args)
            .current_dir(module_path)
            .stdin(Stdio::null())
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                log::info!(
                    "Rebuilding {} has finished, will try to load the module again.",
                    module_path.display()
                );
                Step::Retry
            }
            Ok(output) => {
                log::warn!(
                    "Attempt to rebuild {} has failed with {}.",
                    module_path.display(),
                    output.status
                );
                log::debug!("{}", String::from_utf8_lossy(&output.stderr));
                Step::Skip
            }
            Err(err) => {
                log::warn!(
                    "Attempt to rebuild {} via {} has failed with an error: {}",
                    module_path.display(),
                    command.program.display(),
                    err
                );
                Step::Skip
            }
        }
    }
}

async fn run_blocking<F>(f: F) -> Result<(), LoadError>
where
    F: FnOnce() -> Result<(), LoadError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Unpacks `archive` into `into`, removing what an earlier unpack left in
/// `target` first.
fn unpack(archive: &Path, into: &Path, target: &Path) -> Result<(), LoadError> {
    match fs::remove_dir_all(target) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    let file = File::open(archive)?;
    tar::Archive::new(GzDecoder::new(file)).unpack(into)?;
    Ok(())
}

/// Copies everything below `from` into `to`, dot files included, replacing
/// existing files.
fn copy_tree(from: &Path, to: &Path) -> Result<(), LoadError> {
    for entry in WalkDir::new(from) {
        let entry = entry?;
        let relative = match entry.path().strip_prefix(from) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
