//! Length-prefixed framing and the envelope codec for zrpc.
//!
//! Every transport message is one frame:
//! - A 2-byte magic number ("ZR") for stream synchronization
//! - A 4-byte little-endian payload length
//! - The payload: one JSON-encoded [`Envelope`]
//!
//! [`EnvelopeCodec`] plugs both layers into `tokio_util::codec::Framed`.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod framed;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC};
pub use envelope::{
    decode_envelope, encode_envelope, CorrelationId, Envelope, WireError, PROTOCOL_VERSION,
};
pub use error::{FrameError, Result};
pub use framed::EnvelopeCodec;
