use bytes::Bytes;
use dispatch_proto::RunResponse;
use prost::Message;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use thiserror::Error;

use crate::wire::EmbeddedRequest;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(
        "failed to contact local application endpoint ({endpoint}): {reason}. \
         Please check that -e,--endpoint is correct."
    )]
    Connect { endpoint: String, reason: String },

    #[error("failed to read response from local application endpoint ({endpoint}): {reason}")]
    Read { endpoint: String, reason: String },
}

/// A fully buffered response from the local application endpoint.
#[derive(Debug)]
pub struct LocalResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl LocalResponse {
    /// Whether the body is a recognisable function-call response.
    pub fn is_proto(&self) -> bool {
        self.status == StatusCode::OK
            && self
                .headers
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v == "application/proto")
                .unwrap_or(false)
    }

    pub fn decode_run_response(&self) -> Result<RunResponse, prost::DecodeError> {
        RunResponse::decode(self.body.clone())
    }
}

/// Replays an embedded request against the local endpoint and buffers the
/// response. The scheme is always plain HTTP; the host is the configured
/// endpoint address.
pub async fn forward(
    client: &reqwest::Client,
    local_endpoint: &str,
    request: &EmbeddedRequest,
) -> Result<LocalResponse, ForwardError> {
    let url = format!("http://{}{}", local_endpoint, request.path);

    let response = client
        .request(request.method.clone(), &url)
        .headers(request.headers.clone())
        .body(request.body.clone())
        .send()
        .await
        .map_err(|err| ForwardError::Connect {
            endpoint: local_endpoint.to_string(),
            reason: err.to_string(),
        })?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(|err| ForwardError::Read {
        endpoint: local_endpoint.to_string(),
        reason: err.to_string(),
    })?;

    Ok(LocalResponse {
        status,
        headers,
        body,
    })
}
