use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::codec::{decode_frame, encode_frame, FrameConfig};
use crate::envelope::{decode_envelope, encode_envelope, Envelope};
use crate::error::{FrameError, Result};

/// `tokio_util` codec turning a byte stream into [`Envelope`]s and back.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec {
    config: FrameConfig,
}

impl EnvelopeCodec {
    /// Create a codec with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self { config }
    }

    /// Current codec configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        let Some(payload) = decode_frame(src, self.config.max_payload_size)? else {
            return Ok(None);
        };
        let envelope = decode_envelope(&payload)?;
        trace!(id = %envelope.id, event = ?envelope.event, more = ?envelope.more, "decoded envelope");
        Ok(Some(envelope))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        match self.decode(src)? {
            Some(envelope) => Ok(Some(envelope)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = FrameError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<()> {
        let payload = encode_envelope(&envelope)?;
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }
        encode_frame(&payload, dst)
    }
}
