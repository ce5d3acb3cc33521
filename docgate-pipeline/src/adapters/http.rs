/// HTTP-backed external operation
///
/// POSTs the validated request as JSON to the operation's configured URL and
/// parses whatever body comes back, whatever the status code: upstreams
/// report semantic failures as `{"success": false, ...}` with 4xx/5xx codes.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ExternalOperation, OperationError, OperationRequest, UpstreamResult};

/// Upstream reached over HTTP
pub struct HttpOperation {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpOperation {
    /// Creates an operation with its own client
    ///
    /// `timeout` bounds the whole HTTP exchange; the orchestrator applies the
    /// same budget again around the call.
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(name, url, client))
    }

    /// Creates an operation sharing an existing client
    pub fn with_client(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl ExternalOperation for HttpOperation {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: OperationRequest) -> Result<UpstreamResult, OperationError> {
        debug!(operation = %self.name, req_id = %request.req_id, "Calling upstream");

        let response = self
            .client
            .post(&self.url)
            .json(&request.to_json())
            .send()
            .await
            .map_err(|e| {
                warn!(operation = %self.name, error = %e, "Upstream request failed");
                if e.is_timeout() {
                    OperationError::Transport(format!("timed out: {}", e))
                } else {
                    OperationError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| OperationError::Transport(e.to_string()))?;

        let value: Value = serde_json::from_slice(&body).map_err(|e| {
            warn!(operation = %self.name, status = %status, "Upstream returned a non-JSON body");
            OperationError::InvalidResponse(format!("status {}: {}", status, e))
        })?;

        UpstreamResult::from_body(value)
    }
}
