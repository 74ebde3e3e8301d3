use std::time::Duration;

use instana_collector::test::TestConnection;
use instana_collector::tracing::SpanOptions;
use instana_collector::{Collector, CollectorOptions, SessionState};

#[tokio::test(start_paused = true)]
async fn test_collector_lifecycle() {
    let _ = pretty_env_logger::try_init();

    let connection = TestConnection::new();
    connection.push_failure("connection refused");
    connection.push_response(
        r#"{"pid": 4711, "agentUuid": "abc", "extraHeaders": ["X-Request-Id"],
            "secrets": {"matcher": "regex", "list": ["pass.*"]}}"#,
    );

    let options = CollectorOptions {
        stack_trace_length: 0,
        ..Default::default()
    };
    let collector = Collector::with_connection(options, connection.clone()).unwrap();
    let span = collector.tracer().start_span("early", SpanOptions::default());
    span.finish(None);

    let response = collector.announce_cycle().wait_for_registration().await;
    assert_eq!(response.pid, 4711);
    assert_eq!(connection.announce_count(), 2);

    let config = collector.config();
    assert_eq!(config.reported_pid(), 4711);
    assert_eq!(&*config.extra_http_headers(), &["x-request-id".to_string()]);
    assert!(collector.is_secret("password"));
    assert!(!collector.is_secret("my-password"));

    tokio::time::sleep(Duration::from_secs(2)).await;
    let sent = connection.sent_spans();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 4711);
    assert_eq!(sent[0].1[0].name(), "early");

    collector.announce_cycle().connection_lost();
    assert_eq!(collector.announce_cycle().state(), SessionState::Unregistered);
}
