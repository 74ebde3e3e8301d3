//! The in-process core of a telemetry collector.
//!
//! The collector registers the process with the local monitoring agent,
//! records spans and ships them to the agent, sends diagnostic messages, and
//! loads optional native modules without ever taking the host process down
//! with it.
//!
//! # Quickstart
//!
//! ```no_run
//! use instana_collector::tracing::{tags, SpanOptions};
//!
//! # #[tokio::main] async fn main() {
//! let collector = instana_collector::init(instana_collector::CollectorOptions {
//!     service_name: Some("checkout".into()),
//!     ..Default::default()
//! })
//! .expect("failed to set up the agent connection");
//!
//! let span = collector.tracer().start_span(
//!     "GET /cart",
//!     SpanOptions::default().with_tag(tags::SPAN_KIND, tags::SPAN_KIND_RPC_SERVER),
//! );
//! span.set_tag("http.status_code", 200);
//! span.finish(None);
//! # }
//! ```
//!
//! # Components
//!
//! * [`announce`]: the announce cycle that registers the process and
//!   installs the agent's configuration into [`ProcessConfig`].
//! * [`agent`]: the HTTP connection to the agent and the fire and forget
//!   diagnostic logger.
//! * [`tracing`]: spans, their context and the span buffer.
//! * [`exporter`]: periodic upload of finished spans.
//! * [`native`]: the resilient loader for optional native modules.
//! * [`secrets`]: the secrets policy handed out by the agent.
//!
//! # Features
//!
//! * `test`: exposes the [`test`] module with doubles for the agent
//!   connection and the native module loader.
#![warn(missing_docs)]

mod config;
mod constants;
mod error;
mod init;
mod options;

pub mod agent;
pub mod announce;
pub mod exporter;
pub mod native;
pub mod secrets;
pub mod tracing;


pub use crate::announce::{AnnounceCycle, AnnounceResponse, SessionState};
pub use crate::config::{ProcessConfig, ProcessIdentity};
pub use crate::constants::{ARCH, PLATFORM, RUSTC_VERSION, USER_AGENT, VERSION};
pub use crate::error::{AgentError, AnnounceError, LoadError, SecretsError};
pub use crate::init::{init, Collector};
pub use crate::options::{CollectorOptions, DEFAULT_AGENT_HOST, DEFAULT_AGENT_PORT};
