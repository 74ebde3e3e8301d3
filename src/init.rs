use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::agent::{AgentConnection, AgentLogger, AnnounceRequest, HttpAgentConnection, LogLevel};
use crate::announce::AnnounceCycle;
use crate::config::ProcessConfig;
use crate::error::AgentError;
use crate::exporter::SpanExporter;
use crate::options::CollectorOptions;
use crate::tracing::Tracer;

/// The running collector returned by [`init`].
///
/// When this is dropped the span exporter stops.  The announce cycle keeps
/// its current state.
#[must_use = "when the collector is dropped buffered spans are no longer exported"]
pub struct Collector {
    config: Arc<ProcessConfig>,
    tracer: Tracer,
    announce: AnnounceCycle,
    logger: AgentLogger,
    exporter: Option<JoinHandle<()>>,
}

impl Collector {
    /// Wires up a collector talking to the agent through `connection`.
    ///
    /// Starts announcing and exporting right away when called within a tokio
    /// runtime.
    pub fn with_connection(
        options: CollectorOptions,
        connection: Arc<dyn AgentConnection>,
    ) -> Result<Collector, AgentError> {
        let config = Arc::new(ProcessConfig::new(
            options.service_name.as_ref().map(|name| name.to_string()),
        ));
        let tracer = Tracer::new(config.clone(), &options);
        let logger = AgentLogger::new(&options)?;
        let announce = AnnounceCycle::new(
            connection.clone(),
            config.clone(),
            AnnounceRequest::for_current_process(),
            options.announce_retry_delay,
        );
        announce.start();

        let exporter = SpanExporter::new(
            tracer.buffer().clone(),
            connection,
            config.clone(),
            announce.subscribe(),
        )
        .spawn(options.transmission_delay);
        if exporter.is_none() {
            log::warn!("Not running within a tokio runtime, spans will not be exported.");
        }

        Ok(Collector {
            config,
            tracer,
            announce,
            logger,
            exporter,
        })
    }

    /// The tracer spans are created with.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// The process-wide configuration.
    pub fn config(&self) -> &Arc<ProcessConfig> {
        &self.config
    }

    /// The announce cycle.
    pub fn announce_cycle(&self) -> &AnnounceCycle {
        &self.announce
    }

    /// Checks a key against the secrets policy handed out by the agent.
    pub fn is_secret(&self, key: &str) -> bool {
        self.config.is_secret(key)
    }

    /// Sends a diagnostic message to the agent.
    pub fn log_to_agent(&self, level: LogLevel, message: &str, stack_trace: Option<&str>) {
        self.logger.send(level, message, stack_trace);
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        log::debug!("dropping collector, stopping span export");
        if let Some(exporter) = self.exporter.take() {
            exporter.abort();
        }
    }
}

/// Creates a collector that talks to the agent configured in `options`.
///
/// # Examples
///
/// ```no_run
/// # #[tokio::main] async fn main() {
/// let collector = instana_collector::init(instana_collector::CollectorOptions::from_env())
///     .expect("failed to set up the agent connection");
/// let span = collector.tracer().start_span("startup", Default::default());
/// span.finish(None);
/// # }
/// ```
pub fn init(options: CollectorOptions) -> Result<Collector, AgentError> {
    let connection = Arc::new(HttpAgentConnection::new(&options)?);
    log::debug!("connecting to the agent at {}", options.agent_base_url());
    Collector::with_connection(options, connection)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test::TestConnection;
    use crate::tracing::SpanOptions;

    #[tokio::test(start_paused = true)]
    async fn test_collector_exports_after_registration() {
        let connection = TestConnection::new();
        connection.push_response(
            r#"{"pid": 4711, "agentUuid": "abc", "secrets": {"matcher": "contains", "list": ["tok"]}}"#,
        );
        let options = CollectorOptions {
            service_name: Some("shop".into()),
            stack_trace_length: 0,
            ..Default::default()
        };
        let collector = Collector::with_connection(options, connection.clone()).unwrap();
        collector.announce_cycle().wait_for_registration().await;
        assert!(collector.is_secret("api-token"));

        let span = collector.tracer().start_span("checkout", SpanOptions::default());
        span.finish(None);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let sent = connection.sent_spans();
        assert_eq!(sent.len(), 1);
        let (pid, spans) = &sent[0];
        assert_eq!(*pid, 4711);
        assert_eq!(spans[0].service_name(), Some("shop"));
        assert_eq!(
            spans[0].from.as_ref().map(|f| f.host_id.as_str()),
            Some("abc")
        );
    }
}
