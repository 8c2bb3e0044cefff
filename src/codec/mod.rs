//! Payload serialization.
//!
//! All route payloads and structured frame bodies are MessagePack.

mod msgpack;

pub use msgpack::MsgPackCodec;
