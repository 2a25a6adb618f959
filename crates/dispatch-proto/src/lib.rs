//! Message types for the `dispatch.sdk.v1` function-call protocol.
//!
//! The schema is owned by the platform; the types here are hand-maintained
//! prost derives kept in sync with the published definitions. Only the
//! fields the agent inspects are documented.

mod render;
mod status;

pub use render::{any_bytes, any_string, any_to_string};
pub use status::{status_string, terminal_http_status, terminal_status};

/// A request to run a function, delivered to the application endpoint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RunRequest {
    /// Name of the function to run.
    #[prost(string, tag = "1")]
    pub function: String,

    /// Identifier of this function call.
    #[prost(string, tag = "5")]
    pub dispatch_id: String,

    /// Identifier of the parent call, empty for root calls.
    #[prost(string, tag = "6")]
    pub parent_dispatch_id: String,

    /// Identifier of the root call of the hierarchy this call belongs to.
    #[prost(string, tag = "7")]
    pub root_dispatch_id: String,

    #[prost(message, optional, tag = "8")]
    pub creation_time: Option<::prost_types::Timestamp>,

    #[prost(message, optional, tag = "9")]
    pub expiration_time: Option<::prost_types::Timestamp>,

    #[prost(oneof = "run_request::Directive", tags = "2, 3")]
    pub directive: Option<run_request::Directive>,
}

pub mod run_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Directive {
        /// First invocation: the boxed input value.
        #[prost(message, tag = "2")]
        Input(::prost_types::Any),
        /// Resumption of a suspended call with sub-call results.
        #[prost(message, tag = "3")]
        PollResult(super::PollResult),
    }
}

/// The application's response to a [`RunRequest`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RunResponse {
    #[prost(enumeration = "Status", tag = "1")]
    pub status: i32,

    #[prost(oneof = "run_response::Directive", tags = "2, 3")]
    pub directive: Option<run_response::Directive>,
}

pub mod run_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Directive {
        /// The call finished (or tail-called into another function).
        #[prost(message, tag = "2")]
        Exit(super::Exit),
        /// The call suspended, waiting for sub-call results.
        #[prost(message, tag = "3")]
        Poll(super::Poll),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Exit {
    #[prost(message, optional, tag = "1")]
    pub result: Option<CallResult>,

    /// When set, the call is redirected to this function, reusing the
    /// dispatch id.
    #[prost(message, optional, tag = "2")]
    pub tail_call: Option<Call>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Poll {
    #[prost(bytes = "vec", tag = "1")]
    pub coroutine_state: Vec<u8>,

    #[prost(message, repeated, tag = "2")]
    pub calls: Vec<Call>,

    #[prost(int32, tag = "3")]
    pub min_results: i32,

    #[prost(int32, tag = "4")]
    pub max_results: i32,

    #[prost(message, optional, tag = "5")]
    pub max_wait: Option<::prost_types::Duration>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PollResult {
    #[prost(bytes = "vec", tag = "1")]
    pub coroutine_state: Vec<u8>,

    #[prost(message, repeated, tag = "2")]
    pub results: Vec<CallResult>,

    #[prost(message, optional, tag = "3")]
    pub error: Option<Error>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Call {
    #[prost(string, tag = "1")]
    pub correlation_id: String,

    #[prost(string, tag = "2")]
    pub endpoint: String,

    #[prost(string, tag = "3")]
    pub function: String,

    #[prost(message, optional, tag = "4")]
    pub input: Option<::prost_types::Any>,

    #[prost(message, optional, tag = "5")]
    pub expiration: Option<::prost_types::Duration>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallResult {
    #[prost(string, tag = "1")]
    pub correlation_id: String,

    #[prost(message, optional, tag = "2")]
    pub output: Option<::prost_types::Any>,

    #[prost(message, optional, tag = "3")]
    pub error: Option<Error>,

    #[prost(string, tag = "4")]
    pub dispatch_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
    /// Language-level error class, e.g. `ValueError`.
    #[prost(string, tag = "1")]
    pub r#type: String,

    #[prost(string, tag = "2")]
    pub message: String,
}

/// Outcome vocabulary shared by responses and call results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Status {
    Unspecified = 0,
    Ok = 1,
    Timeout = 2,
    Throttled = 3,
    InvalidArgument = 4,
    InvalidResponse = 5,
    TemporaryError = 6,
    PermanentError = 7,
    IncompatibleState = 8,
    DnsError = 9,
    TcpError = 10,
    TlsError = 11,
    HttpError = 12,
    Unauthenticated = 13,
    PermissionDenied = 14,
    NotFound = 15,
}
