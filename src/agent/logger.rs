use std::fmt;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use tokio::runtime::Handle;

use super::LOGGER_PATH;
use crate::error::AgentError;
use crate::options::CollectorOptions;

/// Severity attached to a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug.
    Debug,
    /// Info.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
}

impl LogLevel {
    /// The value of the `x-log-level` header.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    m: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    st: Option<&'a str>,
}

/// Ships diagnostic messages to the agent's log endpoint.
///
/// Sending is fire and forget: the request runs in the background and its
/// outcome, including timeouts and error statuses, is ignored.
#[derive(Debug, Clone)]
pub struct AgentLogger {
    client: Client,
    url: String,
}

impl AgentLogger {
    /// Creates a logger for the agent configured in `options`.
    pub fn new(options: &CollectorOptions) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(options.request_timeout).build()?;
        Ok(AgentLogger {
            client,
            url: format!("{}{}", options.agent_base_url(), LOGGER_PATH),
        })
    }

    /// Sends `message` with an optional stack trace.
    ///
    /// Must be called from within a tokio runtime, otherwise the message is
    /// dropped.
    pub fn send(&self, level: LogLevel, message: &str, stack_trace: Option<&str>) {
        let payload = Payload {
            m: message.trim(),
            st: stack_trace.map(str::trim).filter(|s| !s.is_empty()),
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(err) => {
                log::debug!("Failed to encode diagnostic message: {}", err);
                return;
            }
        };
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::debug!("No runtime available, dropping diagnostic message.");
                return;
            }
        };

        // NOTE: the request is built outside of the async block so the
        // spawned future does not borrow `self`.
        let request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .header(CONTENT_LENGTH, body.len())
            .header("x-log-level", level.as_str())
            .body(body);
        handle.spawn(async move {
            match request.send().await {
                Ok(response) => {
                    // drain the body so the connection can be reused
                    let _ = response.bytes().await;
                }
                Err(err) => {
                    log::trace!("Diagnostic message was not delivered: {}", err);
                }
            }
        });
    }
}
