//! Spans, their context and the buffer finished spans wait in.
//!
//! Spans are created through a [`Tracer`]:
//!
//! ```
//! use std::sync::Arc;
//! use instana_collector::tracing::{SpanOptions, Tracer};
//! use instana_collector::{CollectorOptions, ProcessConfig};
//!
//! let tracer = Tracer::new(Arc::new(ProcessConfig::default()), &CollectorOptions::default());
//! let parent = tracer.start_span("checkout", SpanOptions::default());
//! let child = tracer.start_span("load-cart", SpanOptions::default().child_of(parent.context()));
//! child.finish(None);
//! parent.finish(None);
//!
//! let spans = tracer.buffer().drain();
//! assert_eq!(spans.len(), 2);
//! assert_eq!(spans[0].trace_id, spans[1].trace_id);
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ProcessConfig;
use crate::options::CollectorOptions;

mod buffer;
mod context;
mod record;
mod span;

pub use self::buffer::SpanBuffer;
pub use self::context::{Reference, SpanContext};
pub use self::record::{
    CustomData, SdkData, SpanData, SpanKind, SpanRecord, StackFrame, SDK_SPAN_NAME,
};
pub use self::span::{tags, Span, SpanOptions};

/// Creates spans that end up in a shared [`SpanBuffer`].
#[derive(Clone, Debug)]
pub struct Tracer {
    buffer: Arc<SpanBuffer>,
    config: Arc<ProcessConfig>,
    stack_trace_length: usize,
}

impl Tracer {
    /// Creates a tracer with its own buffer sized by `options`.
    pub fn new(config: Arc<ProcessConfig>, options: &CollectorOptions) -> Tracer {
        Tracer::with_buffer(
            Arc::new(SpanBuffer::new(options.max_buffered_spans)),
            config,
            options.stack_trace_length,
        )
    }

    /// Creates a tracer writing into an existing buffer.
    pub fn with_buffer(
        buffer: Arc<SpanBuffer>,
        config: Arc<ProcessConfig>,
        stack_trace_length: usize,
    ) -> Tracer {
        Tracer {
            buffer,
            config,
            stack_trace_length,
        }
    }

    /// Starts a span named `name`.
    pub fn start_span(&self, name: &str, options: SpanOptions) -> Span {
        Span::start(
            self.buffer.clone(),
            &self.config,
            self.stack_trace_length,
            name,
            options,
        )
    }

    /// The buffer finished spans are added to.
    pub fn buffer(&self) -> &Arc<SpanBuffer> {
        &self.buffer
    }
}

/// A random 64 bit id as 16 lowercase hex digits.
pub(crate) fn generate_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id() {
        let id = generate_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
