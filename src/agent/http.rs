use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::{Client, Response};

use super::{traces_path, AgentConnection, AnnounceRequest, ANNOUNCE_PATH};
use crate::constants::USER_AGENT as COLLECTOR_USER_AGENT;
use crate::error::AgentError;
use crate::options::CollectorOptions;
use crate::tracing::SpanRecord;

/// An [`AgentConnection`] on top of [`reqwest`].
///
/// Every request is bounded by the configured request timeout.
#[derive(Debug, Clone)]
pub struct HttpAgentConnection {
    client: Client,
    base_url: String,
}

impl HttpAgentConnection {
    /// Creates a connection to the agent configured in `options`.
    pub fn new(options: &CollectorOptions) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(options.request_timeout).build()?;
        Ok(Self::with_client(options, client))
    }

    /// Creates a connection that uses the specified [`Client`].
    pub fn with_client(options: &CollectorOptions, client: Client) -> Self {
        HttpAgentConnection {
            client,
            base_url: options.agent_base_url(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn check_status(response: Response) -> Result<Response, AgentError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(AgentError::Status(status.as_u16()))
    }
}

#[async_trait]
impl AgentConnection for HttpAgentConnection {
    async fn announce(&self, request: &AnnounceRequest) -> Result<String, AgentError> {
        let response = self
            .client
            .put(self.url(ANNOUNCE_PATH))
            .header(USER_AGENT, COLLECTOR_USER_AGENT.as_str())
            .json(request)
            .send()
            .await?;
        Ok(check_status(response)?.text().await?)
    }

    async fn send_spans(&self, pid: u32, spans: &[SpanRecord]) -> Result<(), AgentError> {
        let body = serde_json::to_vec(spans)?;
        let response = self
            .client
            .post(self.url(&traces_path(pid)))
            .header(USER_AGENT, COLLECTOR_USER_AGENT.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        check_status(response)?;
        Ok(())
    }
}
