//! The session relay: polls the Dispatch bridge for pending function-call
//! requests, replays them against the locally-running application, and ships
//! the responses back while supervising the application process.

mod bridge;
mod child;
mod coordinator;
mod forward;
mod logs;
mod observer;
mod wire;

pub use bridge::{BridgeClient, BridgeError, PendingRequest, CLEANUP_TIMEOUT, POLL_TIMEOUT};
pub use child::{child_env, ChildSpec};
pub use coordinator::{probe_endpoint, run_session, Interrupt, SessionConfig, SessionOutcome};
pub use forward::{ForwardError, LocalResponse};
pub use logs::{LogSink, PrefixedLineWriter, StderrSink};
pub use observer::FunctionCallObserver;
pub use wire::{parse_request, serialize_response, EmbeddedRequest, WireError};

/// Default address of the local application endpoint.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:8000";

/// Generates a fresh session identifier.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
