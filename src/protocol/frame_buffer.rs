//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management and a two-state
//! machine for fragmented frames:
//! - `WaitingForHeader`: need at least 10 bytes
//! - `WaitingForPayload`: header parsed, need N more payload bytes

use bytes::{Bytes, BytesMut};

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

#[derive(Debug, Clone)]
enum State {
    WaitingForHeader,
    WaitingForPayload { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// All data is stored in a single `BytesMut` buffer; payload extraction is a
/// zero-copy `freeze`.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with a custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns error on protocol violations (unknown kind, reserved flags,
    /// oversized payload); the caller must drop the connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match &self.state {
            State::WaitingForHeader => {
                let header = match Header::decode(&self.buffer) {
                    None => return Ok(None),
                    Some(result) => result?,
                };
                header.validate(self.max_payload_size)?;

                let _ = self.buffer.split_to(HEADER_SIZE);

                if header.payload_length == 0 {
                    return Ok(Some(Frame::new(header, Bytes::new())));
                }

                self.state = State::WaitingForPayload { header };
                self.try_extract_one()
            }

            State::WaitingForPayload { header } => {
                let needed = header.payload_length as usize;
                if self.buffer.len() < needed {
                    return Ok(None);
                }

                let header = *header;
                let payload = self.buffer.split_to(needed).freeze();
                self.state = State::WaitingForHeader;

                Ok(Some(Frame::new(header, payload)))
            }
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, FrameKind};

    #[test]
    fn test_single_complete_frame() {
        let header = Header::new(FrameKind::Next, 7, 5);
        let bytes = build_frame(&header, b"hello");

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stream_id(), 7);
        assert_eq!(&frames[0].payload[..], b"hello");
    }

    #[test]
    fn test_empty_payload_frame() {
        let header = Header::new(FrameKind::Complete, 3, 0);
        let bytes = build_frame(&header, b"");

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut bytes = Vec::new();
        for i in 1u32..=4 {
            let header = Header::new(FrameKind::Next, i, 1);
            bytes.extend(build_frame(&header, &[i as u8]));
        }

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 4);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.stream_id(), (i + 1) as u32);
            assert_eq!(frame.payload[0], (i + 1) as u8);
        }
    }

    #[test]
    fn test_fragmented_frame() {
        let header = Header::new(FrameKind::Next, 9, 8);
        let bytes = build_frame(&header, b"fragment");

        let mut buffer = FrameBuffer::new();

        assert!(buffer.push(&bytes[..4]).unwrap().is_empty());
        assert!(buffer.push(&bytes[4..HEADER_SIZE + 3]).unwrap().is_empty());

        let frames = buffer.push(&bytes[HEADER_SIZE + 3..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"fragment");
    }

    #[test]
    fn test_byte_at_a_time() {
        let header = Header::new(FrameKind::Payload, 2, 3);
        let bytes = build_frame(&header, b"abc");

        let mut buffer = FrameBuffer::new();
        let mut collected = Vec::new();
        for b in &bytes {
            collected.extend(buffer.push(std::slice::from_ref(b)).unwrap());
        }

        assert_eq!(collected.len(), 1);
        assert_eq!(&collected[0].payload[..], b"abc");
    }

    #[test]
    fn test_payload_too_large_rejected() {
        let header = Header::new(FrameKind::Next, 1, 1024);
        let bytes = build_frame(&header, &[0u8; 1024]);

        let mut buffer = FrameBuffer::with_max_payload(100);
        assert!(buffer.push(&bytes).is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut bytes = build_frame(&Header::new(FrameKind::Next, 1, 0), b"");
        bytes[0] = 0xEE;

        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(&bytes).is_err());
    }
}
