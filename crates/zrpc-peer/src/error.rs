use std::time::Duration;

use zrpc_frame::{CorrelationId, WireError};

/// Error name reported when a call saw no traffic within the heartbeat window.
pub const TIMEOUT_EXPIRED: &str = "TimeoutExpired";
/// Error name for calls to unregistered procedures.
pub const METHOD_NOT_FOUND: &str = "MethodNotFound";
/// Error name for argument count mismatches.
pub const INVALID_ARGUMENTS: &str = "InvalidArguments";
/// Error name for handlers that panicked.
pub const HANDLER_PANICKED: &str = "HandlerPanicked";

/// Boxed error type accepted from procedure handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur setting up or running connections.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] zrpc_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] zrpc_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// No Tokio runtime is available to drive the connection.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;

/// Failure to send a reply on a server-side call.
///
/// These are usage faults raised to the handler, never sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    /// The call already received its terminal frame, expired or was dropped.
    #[error("call {0} is already closed")]
    Closed(CorrelationId),

    /// The connection carrying the call is gone.
    #[error("connection closed: {0}")]
    Disconnected(String),
}

/// Terminal error delivered to the caller of a remote procedure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// The remote procedure (or dispatcher) reported an error.
    #[error("{0}")]
    Remote(WireError),

    /// No traffic was seen for the call within the heartbeat window.
    #[error("no response within {0:?}")]
    TimeoutExpired(Duration),

    /// The connection could not be established or failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The client was closed before the call was issued.
    #[error("client closed")]
    Closed,
}

impl RpcError {
    /// Error classification, suitable for branching on timeout vs. failure.
    pub fn name(&self) -> &str {
        match self {
            Self::Remote(err) => err.name.as_deref().unwrap_or("Error"),
            Self::TimeoutExpired(_) => TIMEOUT_EXPIRED,
            Self::Connection(_) => "ConnectionError",
            Self::Closed => "ClientClosed",
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        match self {
            Self::Remote(err) => err.message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this is the liveness timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutExpired(_))
    }
}

/// Reduce a handler error to its wire form, keeping the name of a
/// [`WireError`] and the message of anything else.
pub(crate) fn to_wire_error(err: BoxError) -> WireError {
    match err.downcast::<WireError>() {
        Ok(wire) => *wire,
        Err(other) => WireError::new(other.to_string()),
    }
}
