//! Periodic upload of finished spans.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::agent::AgentConnection;
use crate::announce::SessionState;
use crate::config::ProcessConfig;
use crate::tracing::SpanBuffer;

/// Drains the span buffer and uploads its contents while the process is
/// registered with an agent.
pub struct SpanExporter {
    buffer: Arc<SpanBuffer>,
    connection: Arc<dyn AgentConnection>,
    config: Arc<ProcessConfig>,
    session: watch::Receiver<SessionState>,
}

impl SpanExporter {
    /// Creates an exporter. `session` decides whether uploading is possible.
    pub fn new(
        buffer: Arc<SpanBuffer>,
        connection: Arc<dyn AgentConnection>,
        config: Arc<ProcessConfig>,
        session: watch::Receiver<SessionState>,
    ) -> SpanExporter {
        SpanExporter {
            buffer,
            connection,
            config,
            session,
        }
    }

    /// Uploads everything currently buffered and returns the number of
    /// spans delivered.
    ///
    /// While unregistered the buffer is left alone. A failed upload drops
    /// the batch.
    pub async fn transmit(&self) -> usize {
        if !self.session.borrow().is_registered() {
            return 0;
        }
        let spans = self.buffer.drain();
        if spans.is_empty() {
            return 0;
        }
        let pid = self.config.reported_pid();
        match self.connection.send_spans(pid, &spans).await {
            Ok(()) => {
                log::trace!("Transmitted {} spans.", spans.len());
                spans.len()
            }
            Err(err) => {
                log::debug!("Failed to transmit {} spans, dropping them: {}", spans.len(), err);
                0
            }
        }
    }

    /// Transmits every `delay` in a background task.
    ///
    /// Returns `None` when called outside of a tokio runtime.
    pub fn spawn(self, delay: Duration) -> Option<JoinHandle<()>> {
        let handle = Handle::try_current().ok()?;
        Some(handle.spawn(async move {
            let mut ticks = interval_at(Instant::now() + delay, delay);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                self.transmit().await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announce::AnnounceResponse;
    use crate::test::TestConnection;
    use crate::tracing::{SpanOptions, Tracer};

    fn registered() -> SessionState {
        SessionState::Registered(AnnounceResponse {
            pid: 4711,
            agent_uuid: "abc".into(),
            extra_headers: None,
            secrets: None,
        })
    }

    fn setup() -> (Tracer, Arc<TestConnection>, Arc<ProcessConfig>) {
        let config = Arc::new(ProcessConfig::default());
        config.set_reported_pid(4711);
        let tracer = Tracer::with_buffer(Arc::new(SpanBuffer::new(None)), config.clone(), 0);
        (tracer, TestConnection::new(), config)
    }

    #[tokio::test]
    async fn test_holds_spans_until_registered() {
        let (tracer, connection, config) = setup();
        let (state, session) = watch::channel(SessionState::Unregistered);
        let exporter =
            SpanExporter::new(tracer.buffer().clone(), connection.clone(), config, session);

        tracer.start_span("a", SpanOptions::default()).finish(None);
        assert_eq!(exporter.transmit().await, 0);
        assert_eq!(tracer.buffer().len(), 1);

        state.send_replace(registered());
        assert_eq!(exporter.transmit().await, 1);
        assert!(tracer.buffer().is_empty());

        let sent = connection.sent_spans();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 4711);
        assert_eq!(sent[0].1[0].name(), "a");
    }

    #[tokio::test]
    async fn test_failed_upload_drops_batch() {
        let (tracer, connection, config) = setup();
        let (_state, session) = watch::channel(registered());
        let exporter =
            SpanExporter::new(tracer.buffer().clone(), connection.clone(), config, session);

        connection.fail_span_uploads(true);
        tracer.start_span("a", SpanOptions::default()).finish(None);
        assert_eq!(exporter.transmit().await, 0);
        assert!(tracer.buffer().is_empty());
        assert!(connection.sent_spans().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_exporter_transmits_periodically() {
        let (tracer, connection, config) = setup();
        let (_state, session) = watch::channel(registered());
        let exporter =
            SpanExporter::new(tracer.buffer().clone(), connection.clone(), config, session);
        let task = exporter.spawn(Duration::from_secs(1)).unwrap();

        tracer.start_span("a", SpanOptions::default()).finish(None);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        tracer.start_span("b", SpanOptions::default()).finish(None);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let sent = connection.sent_spans();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].1[0].name(), "b");
        task.abort();
    }
}
