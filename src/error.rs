//! Error types for peerwire.

use thiserror::Error;

/// Main error type for all peerwire operations.
#[derive(Debug, Error)]
pub enum PeerwireError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (invalid frame kind, reserved bits, oversized payload).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Setup metadata blob is structurally invalid.
    #[error("Malformed credentials: {0}")]
    MalformedCredentials(String),

    /// Handshake credentials were rejected. No session exists.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A route with this name is already registered.
    #[error("Route already registered: {0}")]
    RouteConflict(String),

    /// No handler registered for the requested route.
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    /// Route invoked with the wrong request/response shape.
    #[error("Cardinality mismatch: {0}")]
    CardinalityMismatch(String),

    /// Error reported by the remote handler.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Transport closed; every active stream on the session is torn down.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl PeerwireError {
    /// Wire-level error code carried in `Error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            PeerwireError::RouteNotFound(_) => "route_not_found",
            PeerwireError::CardinalityMismatch(_) => "cardinality_mismatch",
            PeerwireError::Authentication(_) | PeerwireError::MalformedCredentials(_) => {
                "unauthenticated"
            }
            PeerwireError::MsgPackDecode(_) => "bad_payload",
            _ => "internal",
        }
    }

    /// Rebuild a typed error from a wire code + message (requester side).
    pub fn from_wire(code: &str, message: String) -> Self {
        match code {
            "route_not_found" => PeerwireError::RouteNotFound(message),
            "cardinality_mismatch" => PeerwireError::CardinalityMismatch(message),
            "unauthenticated" => PeerwireError::Authentication(message),
            _ => PeerwireError::Remote(message),
        }
    }
}

/// Result type alias using PeerwireError.
pub type Result<T> = std::result::Result<T, PeerwireError>;
