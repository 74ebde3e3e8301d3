//! Communication with the local agent.
//!
//! [`AgentConnection`] is the seam the announce cycle and the exporter talk
//! through; [`HttpAgentConnection`] implements it over HTTP.  The diagnostic
//! [`AgentLogger`] sits next to it and never reports anything back.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AgentError;
use crate::tracing::SpanRecord;

mod http;
mod logger;

pub use self::http::HttpAgentConnection;
pub use self::logger::{AgentLogger, LogLevel};

/// Path the announce request is sent to.
pub const ANNOUNCE_PATH: &str = "/com.instana.plugin.nodejs.discovery";
/// Path diagnostic messages are posted to.
pub const LOGGER_PATH: &str = "/com.instana.agent.logger";

/// Path spans of the process `pid` are posted to.
pub fn traces_path(pid: u32) -> String {
    format!("/com.instana.plugin.nodejs/traces.{}", pid)
}

/// The identity metadata of the announcing process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnounceRequest {
    /// The OS pid.
    pub pid: u32,
    /// The executable.
    pub name: String,
    /// Command line arguments, without the executable.
    pub args: Vec<String>,
}

impl AnnounceRequest {
    /// Describes the current process.
    pub fn for_current_process() -> AnnounceRequest {
        let mut args = std::env::args_os().map(|a| a.to_string_lossy().into_owned());
        let argv0 = args.next();
        let name = std::env::current_exe()
            .ok()
            .map(|p| p.display().to_string())
            .or(argv0)
            .unwrap_or_default();
        AnnounceRequest {
            pid: std::process::id(),
            name,
            args: args.collect(),
        }
    }
}

/// The requests this collector sends to the agent.
#[async_trait]
pub trait AgentConnection: Send + Sync + 'static {
    /// Announces the process and returns the raw response body.
    async fn announce(&self, request: &AnnounceRequest) -> Result<String, AgentError>;

    /// Uploads a batch of finished spans for the process reported as `pid`.
    async fn send_spans(&self, pid: u32, spans: &[SpanRecord]) -> Result<(), AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traces_path() {
        assert_eq!(traces_path(4711), "/com.instana.plugin.nodejs/traces.4711");
    }

    #[test]
    fn test_announce_request_body() {
        let request = AnnounceRequest {
            pid: 12,
            name: "/usr/bin/shop".into(),
            args: vec!["--port".into(), "80".into()],
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"pid": 12, "name": "/usr/bin/shop", "args": ["--port", "80"]})
        );
    }
}
