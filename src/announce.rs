//! The announce cycle registers this process with the local agent.
//!
//! The cycle starts out [`SessionState::Unregistered`] and keeps announcing,
//! with a fixed delay between attempts, until the agent hands out a usable
//! configuration.  It then applies that configuration to the shared
//! [`ProcessConfig`] and moves to [`SessionState::Registered`].  Only an
//! explicit [`AnnounceCycle::connection_lost`] takes it back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::agent::{AgentConnection, AnnounceRequest};
use crate::config::ProcessConfig;
use crate::error::AnnounceError;
use crate::secrets::SecretMatcher;

/// The configuration the agent hands out on a successful announce.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnounceResponse {
    /// The pid this process reports under from now on.
    pub pid: u32,
    /// The uuid of the agent.
    pub agent_uuid: String,
    /// Names of additional HTTP headers to capture.
    #[serde(default)]
    pub extra_headers: Option<Value>,
    /// The secrets policy, `{matcher, list}`.
    #[serde(default)]
    pub secrets: Option<Value>,
}

impl AnnounceResponse {
    /// Parses a raw response body.
    pub fn parse(raw: &str) -> Result<AnnounceResponse, AnnounceError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The extra headers as lower-cased strings, if the agent sent a list.
    ///
    /// Entries that are not strings are skipped.
    pub fn normalized_extra_headers(&self) -> Option<Vec<String>> {
        self.extra_headers.as_ref()?.as_array().map(|headers| {
            headers
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_lowercase)
                .collect()
        })
    }
}

/// Registration state of the process.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    /// Not (yet) registered with an agent.
    #[default]
    Unregistered,
    /// Registered, with the configuration the agent handed out.
    Registered(AnnounceResponse),
}

impl SessionState {
    /// Whether the process is registered.
    pub fn is_registered(&self) -> bool {
        matches!(self, SessionState::Registered(_))
    }
}

struct CycleInner {
    connection: Arc<dyn AgentConnection>,
    config: Arc<ProcessConfig>,
    request: AnnounceRequest,
    retry_delay: Duration,
    state: watch::Sender<SessionState>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by `connection_lost`. A run only registers while its
    /// generation is current.
    generation: AtomicU64,
}

/// Drives the registration with the agent.
///
/// Clones share the same cycle.
#[derive(Clone)]
pub struct AnnounceCycle {
    inner: Arc<CycleInner>,
}

impl std::fmt::Debug for AnnounceCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnounceCycle")
            .field("state", &*self.inner.state.borrow())
            .field("retry_delay", &self.inner.retry_delay)
            .finish()
    }
}

impl AnnounceCycle {
    /// Creates a cycle that announces `request` over `connection`.
    pub fn new(
        connection: Arc<dyn AgentConnection>,
        config: Arc<ProcessConfig>,
        request: AnnounceRequest,
        retry_delay: Duration,
    ) -> AnnounceCycle {
        let (state, _) = watch::channel(SessionState::Unregistered);
        AnnounceCycle {
            inner: Arc::new(CycleInner {
                connection,
                config,
                request,
                retry_delay,
                state,
                task: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Starts announcing in the background.
    ///
    /// Does nothing if already registered or if a cycle is already running.
    /// Has to be called within a tokio runtime.
    pub fn start(&self) {
        if self.state().is_registered() {
            return;
        }
        let mut task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            return;
        }
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::warn!("Cannot announce to the agent outside of a tokio runtime.");
                return;
            }
        };
        let inner = self.inner.clone();
        let generation = inner.generation.load(Ordering::SeqCst);
        *task = Some(handle.spawn(async move { inner.run(generation).await }));
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Waits until the process is registered and returns the agent's configuration.
    pub async fn wait_for_registration(&self) -> AnnounceResponse {
        let mut receiver = self.subscribe();
        loop {
            let registered = match &*receiver.borrow_and_update() {
                SessionState::Registered(response) => Some(response.clone()),
                SessionState::Unregistered => None,
            };
            if let Some(response) = registered {
                return response;
            }
            if receiver.changed().await.is_err() {
                // the sender is owned by `self`
                std::future::pending::<()>().await;
            }
        }
    }

    /// Signals that the connection to the agent was lost.
    ///
    /// Reverts to [`SessionState::Unregistered`] and starts announcing again.
    /// The configuration of the previous registration stays in effect until
    /// the next successful announce.
    pub fn connection_lost(&self) {
        {
            let mut task = self
                .inner
                .task
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(task) = task.take() {
                task.abort();
            }
        }
        log::info!("Connection to the agent lost, announcing again.");
        self.inner.state.send_replace(SessionState::Unregistered);
        self.start();
    }
}

impl CycleInner {
    async fn run(&self, generation: u64) {
        loop {
            match self.connection.announce(&self.request).await {
                Err(err) => {
                    log::info!(
                        "Announce attempt failed: {}. Will retry in {:?}.",
                        err,
                        self.retry_delay
                    );
                }
                Ok(raw) => match AnnounceResponse::parse(&raw) {
                    Err(err) => {
                        log::warn!(
                            "Failed to parse agent response ({}). Response was {:?}. Will retry in {:?}.",
                            err,
                            raw,
                            self.retry_delay
                        );
                    }
                    Ok(response) => {
                        // checked under the state lock, racing `connection_lost` ends unregistered
                        let registered = self.state.send_if_modified(|state| {
                            if !self.is_current(generation) {
                                return false;
                            }
                            apply_response(&self.config, &response);
                            *state = SessionState::Registered(response.clone());
                            true
                        });
                        if !registered {
                            log::debug!("Discarding announce response of a superseded cycle.");
                        }
                        return;
                    }
                },
            }
            tokio::time::sleep(self.retry_delay).await;
            if !self.is_current(generation) {
                return;
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

fn apply_response(config: &ProcessConfig, response: &AnnounceResponse) {
    log::info!(
        "Overwriting pid for reporting purposes to: {}",
        response.pid
    );
    config.set_reported_pid(response.pid);
    config.set_agent_uuid(response.agent_uuid.clone());

    if let Some(headers) = response.normalized_extra_headers() {
        config.set_extra_http_headers(headers);
    }

    if let Some(secrets) = response.secrets.as_ref().filter(|s| !s.is_null()) {
        match SecretMatcher::from_agent_config(secrets) {
            Ok(matcher) => config.set_secrets(matcher),
            Err(err) => log::warn!("Received invalid secrets configuration from agent, {}", err),
        }
    }
}
