//! Wire format encoding and decoding.
//!
//! Implements the 10-byte header format:
//! ```text
//! ┌────────┬───────┬───────────┬───────────┐
//! │ Kind   │ Flags │ Stream ID │ Length    │
//! │ 1 byte │ 1 byte│ 4 bytes   │ 4 bytes   │
//! │        │       │ uint32 BE │ uint32 BE │
//! └────────┴───────┴───────────┴───────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. Stream id 0 is reserved for the
//! connection handshake; initiator-allocated ids are odd, acceptor-allocated
//! ids are even, so both directions allocate without coordination.

use crate::error::{PeerwireError, Result};

/// Header size in bytes (fixed, exactly 10).
pub const HEADER_SIZE: usize = 10;

/// Default maximum payload size (16 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Stream id reserved for handshake frames.
pub const SETUP_STREAM_ID: u32 = 0;

/// Reserved flag bits (all of them; no flags are defined yet).
const RESERVED_FLAGS_MASK: u8 = 0xFF;

/// Frame kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Handshake: version + credential metadata (initiator → acceptor).
    Setup = 0x01,
    /// Handshake accepted; session established.
    SetupOk = 0x02,
    /// Handshake rejected; transport will close.
    SetupReject = 0x03,
    /// Single-value invocation (route envelope payload).
    RequestResponse = 0x04,
    /// Streaming invocation (route envelope payload).
    RequestStream = 0x05,
    /// Single response value, implicitly terminal.
    Payload = 0x06,
    /// One stream element; more may follow.
    Next = 0x07,
    /// Stream completed normally. Empty payload.
    Complete = 0x08,
    /// Terminal error for one stream (msgpack `ErrorBody`).
    Error = 0x09,
    /// Consumer cancels a stream it requested. Empty payload.
    Cancel = 0x0A,
}

impl FrameKind {
    /// Decode a kind byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(FrameKind::Setup),
            0x02 => Some(FrameKind::SetupOk),
            0x03 => Some(FrameKind::SetupReject),
            0x04 => Some(FrameKind::RequestResponse),
            0x05 => Some(FrameKind::RequestStream),
            0x06 => Some(FrameKind::Payload),
            0x07 => Some(FrameKind::Next),
            0x08 => Some(FrameKind::Complete),
            0x09 => Some(FrameKind::Error),
            0x0A => Some(FrameKind::Cancel),
            _ => None,
        }
    }

    /// Whether this kind opens a new inbound invocation.
    #[inline]
    pub fn is_request(self) -> bool {
        matches!(self, FrameKind::RequestResponse | FrameKind::RequestStream)
    }

    /// Whether this kind terminates a stream for its consumer.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FrameKind::Payload | FrameKind::Complete | FrameKind::Error
        )
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame kind.
    pub kind: FrameKind,
    /// Flags byte. All bits reserved, must be zero.
    pub flags: u8,
    /// Logical stream identifier (0 = handshake).
    pub stream_id: u32,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header with zeroed flags.
    pub fn new(kind: FrameKind, stream_id: u32, payload_length: u32) -> Self {
        Self {
            kind,
            flags: 0,
            stream_id,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.kind as u8;
        buf[1] = self.flags;
        buf[2..6].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[6..10].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if the buffer is too short; an unknown kind byte is a
    /// protocol error, not a short read.
    pub fn decode(buf: &[u8]) -> Option<Result<Self>> {
        if buf.len() < HEADER_SIZE {
            return None;
        }

        let kind = match FrameKind::from_u8(buf[0]) {
            Some(k) => k,
            None => {
                return Some(Err(PeerwireError::Protocol(format!(
                    "unknown frame kind: 0x{:02X}",
                    buf[0]
                ))))
            }
        };

        Some(Ok(Self {
            kind,
            flags: buf[1],
            stream_id: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
            payload_length: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
        }))
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks reserved flag bits and the payload size cap.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.flags & RESERVED_FLAGS_MASK != 0 {
            return Err(PeerwireError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        if self.payload_length > max_payload_size {
            return Err(PeerwireError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        let setup_kind = matches!(
            self.kind,
            FrameKind::Setup | FrameKind::SetupOk | FrameKind::SetupReject
        );
        if setup_kind != (self.stream_id == SETUP_STREAM_ID) {
            return Err(PeerwireError::Protocol(format!(
                "{:?} frame on stream {}",
                self.kind, self.stream_id
            )));
        }

        Ok(())
    }
}
