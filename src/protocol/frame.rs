//! Frame struct, frame building, and structured frame bodies.
//!
//! Request frames carry a route envelope in their payload:
//!
//! ```text
//! ┌────────────────┬────────────┬──────┐
//! │ Route name len │ Route name │ Body │
//! │ 2 bytes u16 BE │ UTF-8      │ ...  │
//! └────────────────┴────────────┴──────┘
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::wire_format::{Header, HEADER_SIZE};
use crate::error::{PeerwireError, Result};

/// Protocol version carried in `Setup` frames.
pub const PROTOCOL_VERSION: &str = "1.0";

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get the stream id.
    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    /// Get the frame kind.
    #[inline]
    pub fn kind(&self) -> super::FrameKind {
        self.header.kind
    }
}

/// Body of a `Setup` frame.
#[derive(Debug, Serialize, Deserialize)]
pub struct SetupBody {
    /// Protocol version.
    pub version: String,
    /// Content type of the credential metadata.
    pub mime_type: String,
    /// Opaque credential blob.
    #[serde(with = "serde_bytes")]
    pub metadata: Vec<u8>,
}

/// Body of `Error` and `SetupReject` frames.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (see `PeerwireError::code`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Build a wire error body from an error.
    pub fn from_error(err: &PeerwireError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Rebuild the typed error on the consuming side.
    pub fn into_error(self) -> PeerwireError {
        PeerwireError::from_wire(&self.code, self.message)
    }
}

/// Build a complete frame as a single byte vector.
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// Encode a route envelope: length-prefixed route name followed by the body.
///
/// # Errors
///
/// Returns a protocol error if the route name exceeds the u16 length prefix.
pub fn encode_request(route: &str, body: &[u8]) -> Result<Vec<u8>> {
    let name = route.as_bytes();
    if name.len() > u16::MAX as usize {
        return Err(PeerwireError::Protocol("route name too long".to_string()));
    }

    let mut buf = Vec::with_capacity(2 + name.len() + body.len());
    buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
    buf.extend_from_slice(name);
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Decode a route envelope into `(route, body)`. Zero-copy on the body.
pub fn decode_request(payload: &Bytes) -> Result<(String, Bytes)> {
    if payload.len() < 2 {
        return Err(PeerwireError::Protocol(
            "request payload shorter than route prefix".to_string(),
        ));
    }

    let name_len = u16::from_be_bytes([payload[0], payload[1]]) as usize;
    if payload.len() < 2 + name_len {
        return Err(PeerwireError::Protocol(
            "route name overruns request payload".to_string(),
        ));
    }

    let route = std::str::from_utf8(&payload[2..2 + name_len])
        .map_err(|_| PeerwireError::Protocol("route name not UTF-8".to_string()))?
        .to_string();

    Ok((route, payload.slice(2 + name_len..)))
}
