use std::collections::BTreeMap;

/// The propagated part of a span.
///
/// Everything except the baggage is fixed once the span starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    pub(crate) trace_id: String,
    pub(crate) span_id: String,
    pub(crate) parent_id: Option<String>,
    pub(crate) baggage: BTreeMap<String, String>,
    pub(crate) sampling_priority: i64,
}

impl SpanContext {
    /// Creates a context for a span that lives in another process, e.g. one
    /// extracted from incoming trace headers.
    pub fn remote(trace_id: impl Into<String>, span_id: impl Into<String>) -> SpanContext {
        SpanContext {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_id: None,
            baggage: BTreeMap::new(),
            sampling_priority: 1,
        }
    }

    /// Adds a baggage item.
    #[must_use]
    pub fn with_baggage_item(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }

    /// Sets the sampling priority.
    #[must_use]
    pub fn with_sampling_priority(mut self, priority: i64) -> Self {
        self.sampling_priority = priority;
        self
    }

    /// The trace id.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// The span id.
    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    /// The parent span id, `None` for root spans.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// All baggage items.
    pub fn baggage(&self) -> &BTreeMap<String, String> {
        &self.baggage
    }

    /// A single baggage item.
    pub fn baggage_item(&self, key: &str) -> Option<&str> {
        self.baggage.get(key).map(String::as_str)
    }

    /// The sampling priority. Spans with a priority of 0 or less are never exported.
    pub fn sampling_priority(&self) -> i64 {
        self.sampling_priority
    }

    /// Whether a span with this context gets exported.
    pub fn is_sampled(&self) -> bool {
        self.sampling_priority > 0
    }
}

/// A causal link from a new span to an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// The new span is a child of the referenced one.
    ChildOf(SpanContext),
    /// The referenced span does not depend on the new one.
    FollowsFrom(SpanContext),
}

impl Reference {
    /// The referenced context.
    pub fn context(&self) -> &SpanContext {
        match self {
            Reference::ChildOf(ctx) | Reference::FollowsFrom(ctx) => ctx,
        }
    }
}

/// Picks the parent among a list of references.
///
/// The last reference wins, regardless of its kind.
pub(crate) fn select_parent(references: &[Reference]) -> Option<&SpanContext> {
    references.iter().map(Reference::context).last()
}
