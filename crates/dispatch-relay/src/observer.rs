use chrono::{DateTime, Utc};
use dispatch_proto::{RunRequest, RunResponse};

/// Observes function call requests and responses as they pass through the
/// relay.
///
/// The observer may be invoked concurrently from many invocation tasks. For
/// any given request, `observe_response` always comes after the matching
/// `observe_request` — both are issued sequentially by the same invocation.
pub trait FunctionCallObserver: Send + Sync {
    /// Observes a request after it has been received from the bridge and
    /// before it is sent to the local application.
    fn observe_request(&self, now: DateTime<Utc>, request: &RunRequest);

    /// Observes the outcome of forwarding a request.
    ///
    /// If `response` is `None`, the local application did not return a valid
    /// function-call response. If `http_status` is present, an HTTP response
    /// was generated (it may or may not have carried a valid response).
    /// `error` is present when the HTTP request failed or the response could
    /// not be parsed.
    fn observe_response(
        &self,
        now: DateTime<Utc>,
        request: &RunRequest,
        error: Option<&str>,
        http_status: Option<u16>,
        response: Option<&RunResponse>,
    );

    /// Surfaces a fatal session error, e.g. an authentication failure.
    fn set_error(&self, _message: String) {}
}
