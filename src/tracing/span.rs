use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};

use super::buffer::SpanBuffer;
use super::context::{select_parent, Reference, SpanContext};
use super::record::{
    capture_stack, CustomData, SdkData, SpanData, SpanKind, SpanRecord, SDK_SPAN_NAME,
};
use super::{generate_id, now_millis};
use crate::config::ProcessConfig;

/// Tag keys and values the span interprets instead of storing them.
pub mod tags {
    /// A truthy value marks the span as erroneous.
    pub const ERROR: &str = "error";
    /// Decides the span kind, see the `SPAN_KIND_*` values.
    pub const SPAN_KIND: &str = "span.kind";
    /// Overrides the sampling priority of the span context.
    pub const SAMPLING_PRIORITY: &str = "sampling.priority";

    /// Marks an entry span.
    pub const SPAN_KIND_RPC_SERVER: &str = "server";
    /// Marks an exit span.
    pub const SPAN_KIND_RPC_CLIENT: &str = "client";
    /// Marks an entry span.
    pub const SPAN_KIND_MESSAGING_CONSUMER: &str = "consumer";
    /// Marks an exit span.
    pub const SPAN_KIND_MESSAGING_PRODUCER: &str = "producer";
}

/// Optional settings for starting a span.
#[derive(Debug, Clone, Default)]
pub struct SpanOptions {
    /// Links to existing spans. The last one becomes the parent.
    pub references: Vec<Reference>,
    /// Start time in epoch milliseconds, defaults to now.
    pub start_time: Option<u64>,
    /// Tags applied right after the span is created.
    pub tags: Vec<(String, Value)>,
    /// Replaces the name passed to `start_span`.
    pub operation_name: Option<String>,
}

impl SpanOptions {
    /// Makes the new span a child of `parent`.
    #[must_use]
    pub fn child_of(mut self, parent: SpanContext) -> Self {
        self.references.push(Reference::ChildOf(parent));
        self
    }

    /// Makes the new span follow from `previous`.
    #[must_use]
    pub fn follows_from(mut self, previous: SpanContext) -> Self {
        self.references.push(Reference::FollowsFrom(previous));
        self
    }

    /// Sets an explicit start time.
    #[must_use]
    pub fn with_start_time(mut self, millis: u64) -> Self {
        self.start_time = Some(millis);
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Overrides the operation name.
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

#[derive(Debug)]
struct SpanInner {
    context: SpanContext,
    record: SpanRecord,
    finished: bool,
}

/// A running span.
///
/// Clones refer to the same span. The span ends up in the buffer once
/// [`Span::finish`] is called, unless its sampling priority vetoes it.
#[derive(Clone, Debug)]
pub struct Span {
    inner: Arc<Mutex<SpanInner>>,
    buffer: Arc<SpanBuffer>,
}

impl Span {
    pub(crate) fn start(
        buffer: Arc<SpanBuffer>,
        config: &ProcessConfig,
        stack_trace_length: usize,
        name: &str,
        options: SpanOptions,
    ) -> Span {
        let span_id = generate_id();
        let parent = select_parent(&options.references);
        let context = SpanContext {
            trace_id: parent
                .map(|p| p.trace_id.clone())
                .unwrap_or_else(|| span_id.clone()),
            span_id: span_id.clone(),
            parent_id: parent.map(|p| p.span_id.clone()),
            baggage: parent.map(|p| p.baggage.clone()).unwrap_or_default(),
            sampling_priority: parent.map_or(1, |p| p.sampling_priority),
        };
        let record = SpanRecord {
            span_id,
            trace_id: context.trace_id.clone(),
            parent_id: context.parent_id.clone(),
            start_time: options.start_time.unwrap_or_else(now_millis),
            duration: 0,
            error_count: 0,
            span_name: SDK_SPAN_NAME,
            from: config.from(),
            stack: capture_stack(stack_trace_length),
            data: SpanData {
                service: config.service_name().map(str::to_owned),
                sdk: SdkData {
                    kind: SpanKind::Intermediate,
                    name: name.to_owned(),
                    custom: CustomData::default(),
                },
            },
        };

        let mut inner = SpanInner {
            context,
            record,
            finished: false,
        };
        for (key, value) in options.tags {
            inner.apply_tag(&key, value);
        }
        if let Some(name) = options.operation_name {
            inner.record.data.sdk.name = name;
        }

        Span {
            inner: Arc::new(Mutex::new(inner)),
            buffer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SpanInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A snapshot of the span context, used to start children.
    pub fn context(&self) -> SpanContext {
        self.lock().context.clone()
    }

    /// Renames the span.
    pub fn set_operation_name(&self, name: impl Into<String>) {
        self.lock().record.data.sdk.name = name.into();
    }

    /// Sets a tag.
    ///
    /// `error`, `span.kind` and `sampling.priority` are interpreted, see
    /// [`tags`]. Values that cannot be interpreted are dropped.
    pub fn set_tag(&self, key: &str, value: impl Into<Value>) {
        self.lock().apply_tag(key, value.into());
    }

    /// Sets several tags at once.
    pub fn add_tags<I, K, V>(&self, tags: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut inner = self.lock();
        for (key, value) in tags {
            inner.apply_tag(key.as_ref(), value.into());
        }
    }

    /// Records log fields under `timestamp` (epoch milliseconds, defaults to now).
    ///
    /// Fields logged under the same timestamp are merged.
    pub fn log<I, K, V>(&self, fields: I, timestamp: Option<u64>)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let timestamp = timestamp.unwrap_or_else(now_millis);
        let mut inner = self.lock();
        let bucket = inner
            .record
            .data
            .sdk
            .custom
            .logs
            .entry(timestamp)
            .or_insert_with(Map::new);
        for (key, value) in fields {
            bucket.insert(key.into(), value.into());
        }
    }

    /// Sets a baggage item on this span's context.
    pub fn set_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().context.baggage.insert(key.into(), value.into());
    }

    /// Reads a baggage item of this span's context.
    pub fn baggage_item(&self, key: &str) -> Option<String> {
        self.lock().context.baggage_item(key).map(str::to_owned)
    }

    /// Whether `finish` was called on this span or one of its clones.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Finishes the span at `finish_time` (epoch milliseconds, defaults to now).
    ///
    /// Only the first call has an effect. Spans with a sampling priority of 0
    /// or less are discarded instead of buffered.
    pub fn finish(&self, finish_time: Option<u64>) {
        let record = {
            let mut inner = self.lock();
            if inner.finished {
                return;
            }
            inner.finished = true;
            let finish_time = finish_time.unwrap_or_else(now_millis);
            inner.record.duration = finish_time.saturating_sub(inner.record.start_time);
            if !inner.context.is_sampled() {
                log::trace!(
                    "Discarding span {} with sampling priority {}.",
                    inner.record.span_id,
                    inner.context.sampling_priority
                );
                return;
            }
            inner.record.clone()
        };
        self.buffer.add_span(record);
    }
}

impl SpanInner {
    fn apply_tag(&mut self, key: &str, value: Value) {
        match key {
            tags::ERROR => {
                if is_truthy(&value) {
                    self.record.error_count = 1;
                }
            }
            tags::SPAN_KIND => match value.as_str() {
                Some(tags::SPAN_KIND_RPC_SERVER) | Some(tags::SPAN_KIND_MESSAGING_CONSUMER) => {
                    self.record.data.sdk.kind = SpanKind::Entry;
                }
                Some(tags::SPAN_KIND_RPC_CLIENT) | Some(tags::SPAN_KIND_MESSAGING_PRODUCER) => {
                    self.record.data.sdk.kind = SpanKind::Exit;
                }
                _ => {}
            },
            tags::SAMPLING_PRIORITY => match coerce_priority(&value) {
                Some(priority) => self.context.sampling_priority = priority,
                None => log::debug!("Ignoring invalid sampling priority {}.", value),
            },
            _ => {
                self.record.data.sdk.custom.tags.insert(key.to_owned(), value);
            }
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn coerce_priority(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn start(buffer: &Arc<SpanBuffer>, name: &str, options: SpanOptions) -> Span {
        Span::start(
            buffer.clone(),
            &ProcessConfig::default(),
            0,
            name,
            options,
        )
    }

    #[test]
    fn test_root_span() {
        let buffer = Arc::new(SpanBuffer::new(None));
        let span = start(&buffer, "root", SpanOptions::default());
        let ctx = span.context();
        assert_eq!(ctx.trace_id(), ctx.span_id());
        assert_eq!(ctx.span_id().len(), 16);
        assert_eq!(ctx.parent_id(), None);
        assert_eq!(ctx.sampling_priority(), 1);
    }

    #[test]
    fn test_last_reference_becomes_parent() {
        let buffer = Arc::new(SpanBuffer::new(None));
        let first = SpanContext::remote("aaaaaaaaaaaaaaaa", "1111111111111111");
        let last = SpanContext::remote("bbbbbbbbbbbbbbbb", "2222222222222222")
            .with_sampling_priority(3);
        let span = start(
            &buffer,
            "child",
            SpanOptions::default()
                .child_of(first)
                .follows_from(last),
        );
        let ctx = span.context();
        assert_eq!(ctx.trace_id(), "bbbbbbbbbbbbbbbb");
        assert_eq!(ctx.parent_id(), Some("2222222222222222"));
        assert_eq!(ctx.sampling_priority(), 3);
    }

    #[test]
    fn test_baggage_is_copied() {
        let buffer = Arc::new(SpanBuffer::new(None));
        let parent = start(&buffer, "parent", SpanOptions::default());
        parent.set_baggage_item("user", "42");

        let child = start(
            &buffer,
            "child",
            SpanOptions::default().child_of(parent.context()),
        );
        child.set_baggage_item("user", "43");
        child.set_baggage_item("region", "eu");

        assert_eq!(child.baggage_item("user").as_deref(), Some("43"));
        assert_eq!(child.baggage_item("region").as_deref(), Some("eu"));
        assert_eq!(parent.baggage_item("user").as_deref(), Some("42"));
        assert_eq!(parent.baggage_item("region"), None);
    }

    #[test]
    fn test_reserved_tags() {
        let buffer = Arc::new(SpanBuffer::new(None));
        let span = start(&buffer, "op", SpanOptions::default());
        span.set_tag(tags::ERROR, true);
        span.set_tag(tags::ERROR, true);
        span.set_tag(tags::SPAN_KIND, "consumer");
        span.set_tag("http.url", "/shop");
        span.finish(None);

        let record = &buffer.drain()[0];
        assert_eq!(record.error_count, 1);
        assert_eq!(record.kind(), SpanKind::Entry);
        assert_eq!(record.tags().get("http.url"), Some(&json!("/shop")));
        assert!(!record.tags().contains_key(tags::ERROR));
        assert!(!record.tags().contains_key(tags::SPAN_KIND));
    }

    #[test]
    fn test_falsy_error_tags() {
        let buffer = Arc::new(SpanBuffer::new(None));
        let span = start(&buffer, "op", SpanOptions::default());
        span.add_tags(vec![
            (tags::ERROR, json!(false)),
            (tags::ERROR, json!(0)),
            (tags::ERROR, json!("")),
            (tags::ERROR, Value::Null),
        ]);
        span.set_tag(tags::SPAN_KIND, "producer");
        span.finish(None);

        let record = &buffer.drain()[0];
        assert_eq!(record.error_count, 0);
        assert_eq!(record.kind(), SpanKind::Exit);
    }

    #[test]
    fn test_tags_and_name_from_options() {
        let buffer = Arc::new(SpanBuffer::new(None));
        let span = start(
            &buffer,
            "initial",
            SpanOptions::default()
                .with_tag(tags::SPAN_KIND, "server")
                .with_tag("db", "orders")
                .with_operation_name("renamed")
                .with_start_time(1000),
        );
        span.finish(Some(1250));

        let record = &buffer.drain()[0];
        assert_eq!(record.name(), "renamed");
        assert_eq!(record.kind(), SpanKind::Entry);
        assert_eq!(record.start_time, 1000);
        assert_eq!(record.duration, 250);
        assert_eq!(record.tags().get("db"), Some(&json!("orders")));
    }

    #[test]
    fn test_sampling_priority_veto() {
        let buffer = Arc::new(SpanBuffer::new(None));
        let span = start(&buffer, "op", SpanOptions::default());
        span.set_tag(tags::SAMPLING_PRIORITY, "0");
        span.finish(None);
        assert!(buffer.is_empty());
        assert!(span.is_finished());

        let span = start(&buffer, "op", SpanOptions::default());
        span.set_tag(tags::SAMPLING_PRIORITY, -1.7);
        assert_eq!(span.context().sampling_priority(), -1);
        span.set_tag(tags::SAMPLING_PRIORITY, json!({"not": "a number"}));
        assert_eq!(span.context().sampling_priority(), -1);
        span.finish(None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_negative_duration_is_clamped() {
        let buffer = Arc::new(SpanBuffer::new(None));
        let span = start(&buffer, "op", SpanOptions::default().with_start_time(5000));
        span.finish(Some(4000));
        assert_eq!(buffer.drain()[0].duration, 0);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let buffer = Arc::new(SpanBuffer::new(None));
        let span = start(&buffer, "op", SpanOptions::default().with_start_time(10));
        let clone = span.clone();
        span.finish(Some(20));
        clone.finish(Some(30));
        span.finish(None);

        let spans = buffer.drain();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].duration, 10);
    }

    #[test]
    fn test_logs_merge_per_timestamp() {
        let buffer = Arc::new(SpanBuffer::new(None));
        let span = start(&buffer, "op", SpanOptions::default());
        span.log(vec![("event", "retry")], Some(100));
        span.log(vec![("attempt", json!(2))], Some(100));
        span.log(vec![("event", "done")], Some(200));
        span.finish(None);

        let record = &buffer.drain()[0];
        assert_eq!(
            serde_json::to_value(record.logs()).unwrap(),
            json!({
                "100": {"event": "retry", "attempt": 2},
                "200": {"event": "done"}
            })
        );
    }

    #[test]
    fn test_priority_coercion() {
        assert_eq!(coerce_priority(&json!(2)), Some(2));
        assert_eq!(coerce_priority(&json!(1.9)), Some(1));
        assert_eq!(coerce_priority(&json!(" 5 ")), Some(5));
        assert_eq!(coerce_priority(&json!("high")), None);
        assert_eq!(coerce_priority(&json!(true)), None);
    }
}
