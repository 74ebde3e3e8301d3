use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::ProcessIdentity;

/// Name under which spans created through this API are reported.
pub const SDK_SPAN_NAME: &str = "sdk";

/// The role of a span within its trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SpanKind {
    /// The span receives work from outside the process (server, consumer).
    #[serde(rename = "entry")]
    Entry,
    /// The span hands work to another process (client, producer).
    #[serde(rename = "exit")]
    Exit,
    /// Anything in between.
    #[default]
    #[serde(rename = "local")]
    Intermediate,
}

/// A single frame of the stack captured when a span starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    /// Function name.
    #[serde(rename = "m")]
    pub method: String,
    /// Source file.
    #[serde(rename = "c", skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Line number.
    #[serde(rename = "n", skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Free-form tags and logs of a span.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CustomData {
    /// Tags that are not interpreted by the tracer.
    pub tags: Map<String, Value>,
    /// Log fields bucketed by their timestamp.
    pub logs: BTreeMap<u64, Map<String, Value>>,
}

/// Data specific to spans created through the SDK.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SdkData {
    /// The role of the span.
    #[serde(rename = "type")]
    pub kind: SpanKind,
    /// The operation name.
    pub name: String,
    /// Custom tags and logs.
    pub custom: CustomData,
}

/// The `data` section of a span.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpanData {
    /// The service name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// SDK specific data.
    pub sdk: SdkData,
}

/// A finished span as it is handed to the exporter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    /// The span id.
    #[serde(rename = "s")]
    pub span_id: String,
    /// The trace id.
    #[serde(rename = "t")]
    pub trace_id: String,
    /// The span id of the parent, if any.
    #[serde(rename = "p", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Start time in epoch milliseconds.
    #[serde(rename = "ts")]
    pub start_time: u64,
    /// Duration in milliseconds.
    #[serde(rename = "d")]
    pub duration: u64,
    /// 1 if the span was tagged as erroneous, 0 otherwise.
    #[serde(rename = "ec")]
    pub error_count: u8,
    /// The span type, always [`SDK_SPAN_NAME`].
    #[serde(rename = "n")]
    pub span_name: &'static str,
    /// The reporting process.
    #[serde(rename = "f", skip_serializing_if = "Option::is_none")]
    pub from: Option<ProcessIdentity>,
    /// The stack at span start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<StackFrame>>,
    /// Payload.
    pub data: SpanData,
}

impl SpanRecord {
    /// The operation name.
    pub fn name(&self) -> &str {
        &self.data.sdk.name
    }

    /// The role of the span.
    pub fn kind(&self) -> SpanKind {
        self.data.sdk.kind
    }

    /// The service name.
    pub fn service_name(&self) -> Option<&str> {
        self.data.service.as_deref()
    }

    /// Custom tags.
    pub fn tags(&self) -> &Map<String, Value> {
        &self.data.sdk.custom.tags
    }

    /// Custom logs.
    pub fn logs(&self) -> &BTreeMap<u64, Map<String, Value>> {
        &self.data.sdk.custom.logs
    }
}

/// Captures up to `limit` frames of the current stack, skipping the frames
/// of the tracer itself.
pub(crate) fn capture_stack(limit: usize) -> Option<Vec<StackFrame>> {
    if limit == 0 {
        return None;
    }
    let mut frames = Vec::with_capacity(limit);
    backtrace::trace(|frame| {
        backtrace::resolve_frame(frame, |symbol| {
            if frames.len() >= limit {
                return;
            }
            let method = match symbol.name() {
                Some(name) => format!("{:#}", name),
                None => return,
            };
            if is_internal_frame(&method) {
                return;
            }
            frames.push(StackFrame {
                method,
                file: symbol.filename().map(|f| f.display().to_string()),
                line: symbol.lineno(),
            });
        });
        frames.len() < limit
    });
    Some(frames)
}

fn is_internal_frame(method: &str) -> bool {
    method.starts_with("backtrace::")
        || method.starts_with("instana_collector::tracing::")
        || method.starts_with("<instana_collector::tracing::")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_wire_format() {
        let mut record = SpanRecord {
            span_id: "00000000000000aa".into(),
            trace_id: "00000000000000bb".into(),
            parent_id: None,
            start_time: 1000,
            duration: 5,
            error_count: 1,
            span_name: SDK_SPAN_NAME,
            from: Some(ProcessIdentity {
                entity_id: "4711".into(),
                host_id: "abc".into(),
            }),
            stack: None,
            data: SpanData {
                service: Some("shop".into()),
                sdk: SdkData {
                    kind: SpanKind::Entry,
                    name: "GET /".into(),
                    custom: CustomData::default(),
                },
            },
        };
        record
            .data
            .sdk
            .custom
            .logs
            .entry(1002)
            .or_default()
            .insert("event".into(), json!("cache miss"));

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "s": "00000000000000aa",
                "t": "00000000000000bb",
                "ts": 1000,
                "d": 5,
                "ec": 1,
                "n": "sdk",
                "f": {"e": "4711", "h": "abc"},
                "data": {
                    "service": "shop",
                    "sdk": {
                        "type": "entry",
                        "name": "GET /",
                        "custom": {
                            "tags": {},
                            "logs": {"1002": {"event": "cache miss"}}
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn test_intermediate_is_local_on_the_wire() {
        assert_eq!(
            serde_json::to_value(SpanKind::Intermediate).unwrap(),
            json!("local")
        );
    }

    #[test]
    fn test_capture_stack_respects_limit() {
        assert_eq!(capture_stack(0), None);
        let frames = capture_stack(3).unwrap();
        assert!(frames.len() <= 3);
    }
}
