use std::borrow::Cow;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Host the local agent listens on unless configured otherwise.
pub const DEFAULT_AGENT_HOST: &str = "127.0.0.1";
/// Port the local agent listens on unless configured otherwise.
pub const DEFAULT_AGENT_PORT: u16 = 42699;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);
const DEFAULT_ANNOUNCE_RETRY_DELAY: Duration = Duration::from_secs(60);
const DEFAULT_STACK_TRACE_LENGTH: usize = 10;
const DEFAULT_MAX_BUFFERED_SPANS: usize = 1000;
const DEFAULT_TRANSMISSION_DELAY: Duration = Duration::from_secs(1);

/// Configuration settings for the collector.
///
/// # Examples
///
/// ```
/// let options = instana_collector::CollectorOptions {
///     service_name: Some("checkout".into()),
///     ..Default::default()
/// };
/// assert_eq!(options.agent_port, 42699);
/// ```
#[derive(Clone)]
pub struct CollectorOptions {
    /// Host of the local agent.
    pub agent_host: Cow<'static, str>,
    /// Port of the local agent.
    pub agent_port: u16,
    /// Upper bound for every request to the agent. (defaults to 5s)
    pub request_timeout: Duration,
    /// Fixed delay between two announce attempts. (defaults to 60s)
    pub announce_retry_delay: Duration,
    /// Service name reported with every span.
    pub service_name: Option<Cow<'static, str>>,
    /// Number of stack frames captured per span, 0 disables capturing. (defaults to 10)
    pub stack_trace_length: usize,
    /// Maximum number of finished spans waiting for export, `None` for no limit.
    pub max_buffered_spans: Option<usize>,
    /// Interval in which buffered spans are exported. (defaults to 1s)
    pub transmission_delay: Duration,
}

impl Default for CollectorOptions {
    fn default() -> CollectorOptions {
        CollectorOptions {
            agent_host: Cow::Borrowed(DEFAULT_AGENT_HOST),
            agent_port: DEFAULT_AGENT_PORT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            announce_retry_delay: DEFAULT_ANNOUNCE_RETRY_DELAY,
            service_name: None,
            stack_trace_length: DEFAULT_STACK_TRACE_LENGTH,
            max_buffered_spans: Some(DEFAULT_MAX_BUFFERED_SPANS),
            transmission_delay: DEFAULT_TRANSMISSION_DELAY,
        }
    }
}

impl CollectorOptions {
    /// Creates new options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options from the defaults overridden by `INSTANA_*` environment variables.
    ///
    /// Values that cannot be parsed are ignored and the default is kept.
    pub fn from_env() -> Self {
        Self::default().apply_env(|key| env::var(key).ok())
    }

    pub(crate) fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("INSTANA_AGENT_HOST").filter(|h| !h.is_empty()) {
            self.agent_host = Cow::Owned(host);
        }
        if let Some(port) = parse_var(&lookup, "INSTANA_AGENT_PORT") {
            self.agent_port = port;
        }
        if let Some(millis) = parse_var::<u64, _>(&lookup, "INSTANA_AGENT_REQUEST_TIMEOUT") {
            self.request_timeout = Duration::from_millis(millis);
        }
        if let Some(name) = lookup("INSTANA_SERVICE_NAME").filter(|n| !n.is_empty()) {
            self.service_name = Some(Cow::Owned(name));
        }
        if let Some(length) = parse_var(&lookup, "INSTANA_STACK_TRACE_LENGTH") {
            self.stack_trace_length = length;
        }
        self
    }

    /// Points the collector at a different agent.
    #[must_use]
    pub fn with_agent(mut self, host: impl Into<Cow<'static, str>>, port: u16) -> Self {
        self.agent_host = host.into();
        self.agent_port = port;
        self
    }

    /// Sets the service name reported with spans.
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Sets the request timeout for agent communication.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the delay between announce attempts.
    #[must_use]
    pub fn with_announce_retry_delay(mut self, delay: Duration) -> Self {
        self.announce_retry_delay = delay;
        self
    }

    /// Base URL of the local agent, e.g. `http://127.0.0.1:42699`.
    pub fn agent_base_url(&self) -> String {
        format!("http://{}:{}", self.agent_host, self.agent_port)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring invalid value {:?} for {}.", raw, key);
            None
        }
    }
}

impl fmt::Debug for CollectorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorOptions")
            .field("agent", &self.agent_base_url())
            .field("request_timeout", &self.request_timeout)
            .field("announce_retry_delay", &self.announce_retry_delay)
            .field("service_name", &self.service_name)
            .field("stack_trace_length", &self.stack_trace_length)
            .field("max_buffered_spans", &self.max_buffered_spans)
            .field("transmission_delay", &self.transmission_delay)
            .finish()
    }
}
