//! Error types of the collector core.
//!
//! None of these ever reach instrumented application code.  They travel
//! between the internal layers and end up in a log line or in a fallback
//! decision (retry, skip, degrade).

use std::io;

use thiserror::Error;

/// Raised when talking to the local agent fails.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The HTTP request could not be completed (connect, timeout, body).
    #[error("request to the agent failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The agent answered with a status that is not a success.
    #[error("the agent responded with status {0}")]
    Status(u16),
    /// A payload could not be encoded as JSON.
    #[error("could not encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    /// The agent could not be reached for another reason.
    #[error("agent unavailable: {0}")]
    Unavailable(String),
}

/// Raised when an announce response cannot be used.
#[derive(Debug, Error)]
pub enum AnnounceError {
    /// The body is not JSON or lacks a required attribute.
    #[error("could not parse announce response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Raised when the agent hands out a secrets configuration that cannot be applied.
#[derive(Debug, Error)]
pub enum SecretsError {
    /// `matcher` is missing or not a string.
    #[error("attribute matcher is not a string: {0}")]
    MatcherNotString(String),
    /// `matcher` names a kind this collector does not know.
    #[error("matcher is not supported: {0}")]
    UnsupportedMatcher(String),
    /// `list` is missing or not an array.
    #[error("attribute list is not an array: {0}")]
    ListNotArray(String),
    /// `list` contains something that is not a string.
    #[error("list entry is not a string: {0}")]
    ListEntryNotString(String),
    /// A `regex` list entry does not compile.
    #[error("invalid regular expression {0:?}: {1}")]
    InvalidRegex(String, #[source] regex::Error),
}

/// Raised by a single step of loading a native module.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No loadable artifact was found for the module.
    #[error("native module {0} could not be found")]
    NotFound(String),
    /// The dynamic library exists but could not be opened.
    #[error("native module could not be loaded: {0}")]
    Library(#[from] libloading::Error),
    /// A filesystem operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// Walking an unpacked directory tree failed.
    #[error("could not walk directory: {0}")]
    Walk(#[from] walkdir::Error),
    /// A blocking worker task did not complete.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
