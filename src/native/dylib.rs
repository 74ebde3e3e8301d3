use std::path::{Path, PathBuf};

use libloading::Library;

use super::loader::NativeModuleLoader;
use crate::error::LoadError;

/// A dynamic library loaded by [`DylibLoader`].
#[derive(Debug)]
pub struct NativeLibrary {
    name: String,
    path: PathBuf,
    library: Library,
}

impl NativeLibrary {
    /// Name of the module.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The loaded library.
    pub fn library(&self) -> &Library {
        &self.library
    }
}

/// Loads native modules as dynamic libraries from a list of directories.
///
/// A module `name` is installed in `<dir>/<name>` and its library is either
/// directly in there or in `target/release` below it.
#[derive(Debug, Clone, Default)]
pub struct DylibLoader {
    search_dirs: Vec<PathBuf>,
}

impl DylibLoader {
    /// Creates a loader searching the given directories in order.
    pub fn new<I, P>(search_dirs: I) -> DylibLoader
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        DylibLoader {
            search_dirs: search_dirs.into_iter().map(Into::into).collect(),
        }
    }

    fn candidates(&self, name: &str) -> impl Iterator<Item = PathBuf> + '_ {
        let file_name = libloading::library_filename(name);
        let module_dir = name.to_owned();
        self.search_dirs.iter().flat_map(move |dir| {
            let installed = dir.join(&module_dir);
            [
                installed.join(&file_name),
                installed.join("target").join("release").join(&file_name),
            ]
        })
    }
}

impl NativeModuleLoader for DylibLoader {
    type Module = NativeLibrary;

    fn load(&self, name: &str) -> Result<NativeLibrary, LoadError> {
        let path = self
            .candidates(name)
            .find(|path| path.is_file())
            .ok_or_else(|| LoadError::NotFound(name.to_owned()))?;
        // SAFETY: the library's initialisers run on load. Native modules are
        // trusted artifacts of this installation.
        let library = unsafe { Library::new(&path)? };
        Ok(NativeLibrary {
            name: name.to_owned(),
            path,
            library,
        })
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_and_missing_library() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("gcstats")).unwrap();
        let loader = DylibLoader::new([root.path()]);

        assert_eq!(loader.resolve("gcstats"), Some(root.path().join("gcstats")));
        assert_eq!(loader.resolve("other"), None);
        assert!(matches!(
            loader.load("gcstats"),
            Err(LoadError::NotFound(name)) if name == "gcstats"
        ));
    }

    #[test]
    fn test_invalid_library_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let installed = root.path().join("gcstats");
        std::fs::create_dir(&installed).unwrap();
        std::fs::write(
            installed.join(libloading::library_filename("gcstats")),
            "not a library",
        )
        .unwrap();

        let loader = DylibLoader::new([root.path()]);
        assert!(matches!(loader.load("gcstats"), Err(LoadError::Library(_))));
    }
}
