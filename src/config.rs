//! The process-wide configuration context.
//!
//! Everything the agent hands out during the announce handshake lands here.
//! The announce cycle is the only writer, all other parts of the collector
//! read snapshots.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::secrets::SecretMatcher;

/// Identifies the reporting process towards the agent (`f` on spans).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessIdentity {
    /// The reported pid, as a string.
    #[serde(rename = "e")]
    pub entity_id: String,
    /// The agent uuid.
    #[serde(rename = "h")]
    pub host_id: String,
}

/// Shared, announce-driven configuration of this process.
#[derive(Debug)]
pub struct ProcessConfig {
    reported_pid: AtomicU32,
    agent_uuid: RwLock<Option<String>>,
    extra_http_headers: RwLock<Arc<[String]>>,
    secrets: RwLock<Arc<SecretMatcher>>,
    service_name: Option<String>,
}

impl Default for ProcessConfig {
    fn default() -> ProcessConfig {
        ProcessConfig::new(None)
    }
}

impl ProcessConfig {
    /// Creates the initial configuration for the current process.
    pub fn new(service_name: Option<String>) -> ProcessConfig {
        ProcessConfig {
            reported_pid: AtomicU32::new(std::process::id()),
            agent_uuid: RwLock::new(None),
            extra_http_headers: RwLock::new(Arc::from(Vec::new())),
            secrets: RwLock::new(Arc::new(SecretMatcher::default())),
            service_name,
        }
    }

    /// The pid this process reports under.
    ///
    /// Starts out as the OS pid and is replaced by whatever the agent
    /// assigns during announce (the two differ inside containers).
    pub fn reported_pid(&self) -> u32 {
        self.reported_pid.load(Ordering::SeqCst)
    }

    /// The uuid of the agent this process announced to, if any.
    pub fn agent_uuid(&self) -> Option<String> {
        self.agent_uuid
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Lower-cased names of additional HTTP headers instrumentations should capture.
    pub fn extra_http_headers(&self) -> Arc<[String]> {
        self.extra_http_headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The secrets policy currently in effect.
    pub fn secrets(&self) -> Arc<SecretMatcher> {
        self.secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Checks a key against the secrets policy currently in effect.
    pub fn is_secret(&self, key: &str) -> bool {
        self.secrets().is_secret(key)
    }

    /// The configured service name.
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// The identity attached to spans, available once an agent uuid is known.
    pub fn from(&self) -> Option<ProcessIdentity> {
        self.agent_uuid().map(|host_id| ProcessIdentity {
            entity_id: self.reported_pid().to_string(),
            host_id,
        })
    }

    pub(crate) fn set_reported_pid(&self, pid: u32) {
        self.reported_pid.store(pid, Ordering::SeqCst);
    }

    pub(crate) fn set_agent_uuid(&self, uuid: String) {
        *self
            .agent_uuid
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(uuid);
    }

    pub(crate) fn set_extra_http_headers(&self, headers: Vec<String>) {
        *self
            .extra_http_headers
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::from(headers);
    }

    pub(crate) fn set_secrets(&self, matcher: SecretMatcher) {
        *self.secrets.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(matcher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MatcherKind;

    #[test]
    fn test_initial_state() {
        let config = ProcessConfig::new(Some("svc".into()));
        assert_eq!(config.reported_pid(), std::process::id());
        assert_eq!(config.agent_uuid(), None);
        assert!(config.extra_http_headers().is_empty());
        assert_eq!(config.secrets().kind(), MatcherKind::ContainsIgnoreCase);
        assert_eq!(config.service_name(), Some("svc"));
        assert_eq!(config.from(), None);
    }

    #[test]
    fn test_from_after_announce() {
        let config = ProcessConfig::default();
        config.set_reported_pid(4711);
        config.set_agent_uuid("abc".into());
        assert_eq!(
            config.from(),
            Some(ProcessIdentity {
                entity_id: "4711".into(),
                host_id: "abc".into(),
            })
        );
    }
}
