use std::sync::{Mutex, PoisonError};

use super::record::SpanRecord;

/// Finished spans waiting to be exported, in the order they finished.
#[derive(Debug, Default)]
pub struct SpanBuffer {
    spans: Mutex<Vec<SpanRecord>>,
    max_spans: Option<usize>,
}

impl SpanBuffer {
    /// Creates a buffer holding at most `max_spans` spans (`None` for no limit).
    pub fn new(max_spans: Option<usize>) -> SpanBuffer {
        SpanBuffer {
            spans: Mutex::new(Vec::new()),
            max_spans,
        }
    }

    /// Appends a finished span.
    ///
    /// Spans that arrive while the buffer is full are dropped.
    pub(crate) fn add_span(&self, span: SpanRecord) {
        let mut spans = self.spans.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(max) = self.max_spans {
            if spans.len() >= max {
                log::debug!(
                    "Span buffer is full ({} spans), dropping span {}.",
                    max,
                    span.span_id
                );
                return;
            }
        }
        spans.push(span);
    }

    /// Takes all buffered spans, leaving the buffer empty.
    pub fn drain(&self) -> Vec<SpanRecord> {
        let mut spans = self.spans.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *spans)
    }

    /// Number of buffered spans.
    pub fn len(&self) -> usize {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
