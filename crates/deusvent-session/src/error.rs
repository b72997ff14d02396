//! Error types for the session layer.

use deusvent_protocol::{RequestId, SerializationError, ServerError};

/// Errors from request bookkeeping and queueing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// All 255 request ids are held by pending requests.
    #[error("all request ids are in flight")]
    RequestIdsExhausted,

    /// `register` was called with an id that `allocate` never handed out.
    #[error("request id {0} was not allocated")]
    NotAllocated(RequestId),

    /// A continuation is already registered for this id.
    #[error("request id {0} already has a pending request")]
    AlreadyPending(RequestId),

    /// The outbound queue is at its configured bound.
    #[error("outbound queue is full")]
    QueueFull,

    /// The session has been torn down.
    #[error("session is closed")]
    Closed,
}

/// A session configuration that cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The document is not valid JSON for [`SessionConfig`](crate::SessionConfig).
    #[error("invalid config document: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds a value the session cannot run with.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Why a correlated request did not produce the expected response.
///
/// Delivered to the caller through its continuation; never raised
/// anywhere else.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The server answered with a [`ServerError`].
    #[error(transparent)]
    Server(ServerError),

    /// The correlated response could not be decoded (including signature
    /// failures and unknown tags).
    #[error("response could not be decoded: {0}")]
    Decode(SerializationError),

    /// The response decoded fine but is not what this request expects.
    #[error("unexpected response with tag {tag}")]
    UnexpectedResponse { tag: u16 },

    /// No response arrived before the request's deadline.
    #[error("request {0} timed out")]
    Timeout(RequestId),

    /// The session was closed while the request was pending.
    #[error("session closed before a response arrived")]
    Closed,
}
