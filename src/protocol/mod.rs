//! Wire protocol: frame header, frame kinds, and incremental parsing.

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{
    build_frame, decode_request, encode_request, ErrorBody, Frame, SetupBody, PROTOCOL_VERSION,
};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{FrameKind, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, SETUP_STREAM_ID};
