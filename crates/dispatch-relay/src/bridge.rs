use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use thiserror::Error;

/// How long a single long-poll may block server-side. Also the overall
/// timeout of the shared HTTP client.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for abandoning a request after a local-side failure. Independent
/// of the run cancellation.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// A pending request delivered by the bridge. The body is the wire-level
/// serialisation of an HTTP request addressed to the local application.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: String,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The API key was rejected. Terminal: the poller must stop.
    #[error("authentication rejected by the Dispatch API")]
    Unauthorized,

    #[error("failed to contact Dispatch API ({url}): {reason}")]
    Transient { url: String, reason: String },
}

/// Client for the three operations on `<bridge>/sessions/<id>`.
#[derive(Clone)]
pub struct BridgeClient {
    client: reqwest::Client,
    session_url: String,
    bridge_url: String,
    api_key: String,
    host_header: Option<String>,
}

impl BridgeClient {
    pub fn new(
        client: reqwest::Client,
        bridge_url: &str,
        session_id: &str,
        api_key: &str,
        host_header: Option<String>,
    ) -> Self {
        Self {
            client,
            session_url: format!("{bridge_url}/sessions/{session_id}"),
            bridge_url: bridge_url.to_string(),
            api_key: api_key.to_string(),
            host_header,
        }
    }

    pub fn session_url(&self) -> &str {
        &self.session_url
    }

    fn transient(&self, reason: impl Into<String>) -> BridgeError {
        BridgeError::Transient {
            url: self.bridge_url.clone(),
            reason: reason.into(),
        }
    }

    fn apply_common_headers(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", self.api_key),
        );
        match &self.host_header {
            Some(host) => req.header(reqwest::header::HOST, host.as_str()),
            None => req,
        }
    }

    /// Long-polls the session for a pending request. `Ok(None)` means the
    /// poll timed out with no work (a 504 from the bridge) and the caller
    /// should loop immediately.
    pub async fn poll(&self) -> Result<Option<PendingRequest>, BridgeError> {
        tracing::debug!(url = %self.session_url, "getting request from Dispatch");

        let req = self
            .apply_common_headers(self.client.get(&self.session_url))
            .header("Request-Timeout", POLL_TIMEOUT.as_secs().to_string());

        let res = req.send().await.map_err(|err| self.transient(err.to_string()))?;
        match res.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => return Err(BridgeError::Unauthorized),
            // Expected when long polling and no requests are available.
            StatusCode::GATEWAY_TIMEOUT => return Ok(None),
            status => return Err(self.transient(format!("response code {}", status.as_u16()))),
        }

        let request_id = res
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = res
            .bytes()
            .await
            .map_err(|err| self.transient(err.to_string()))?;

        Ok(Some(PendingRequest { request_id, body }))
    }

    /// Sends the serialised HTTP response for a collected request back to
    /// the bridge. A 404 means the request already expired upstream and is
    /// treated as benign.
    pub async fn post_response(
        &self,
        request_id: &str,
        body: Vec<u8>,
    ) -> Result<(), BridgeError> {
        tracing::debug!(request_id, "sending response to Dispatch");

        let req = self
            .apply_common_headers(self.client.post(&self.session_url))
            .header("X-Request-ID", request_id)
            .body(body);

        let res = req
            .send()
            .await
            .map_err(|err| self.transient(format!("send response: {err}")))?;
        match res.status() {
            StatusCode::ACCEPTED => Ok(()),
            StatusCode::NOT_FOUND => {
                tracing::debug!(request_id, method = "post", "request is no longer available");
                Ok(())
            }
            status => Err(self.transient(format!(
                "send response: response code {}",
                status.as_u16()
            ))),
        }
    }

    /// Abandons a request the agent cannot answer so the bridge can re-issue
    /// it promptly. Bounded by [`CLEANUP_TIMEOUT`] regardless of the run
    /// cancellation state.
    pub async fn cleanup(&self, request_id: &str) -> Result<(), BridgeError> {
        tracing::debug!(request_id, "cleaning up request");

        let req = self
            .apply_common_headers(self.client.delete(&self.session_url))
            .header("X-Request-ID", request_id)
            .timeout(CLEANUP_TIMEOUT);

        let res = req
            .send()
            .await
            .map_err(|err| self.transient(format!("cleanup request: {err}")))?;
        match res.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                // The request may be cleaned up concurrently, e.g. when a
                // timeout was reached upstream.
                tracing::debug!(request_id, method = "delete", "request is no longer available");
                Ok(())
            }
            status => Err(self.transient(format!(
                "cleanup request: response code {}",
                status.as_u16()
            ))),
        }
    }
}
