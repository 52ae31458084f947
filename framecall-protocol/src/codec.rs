//! Incremental encoder/decoder for frames and envelopes.

use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::frame::{self, DEFAULT_MAX_FRAME_SIZE};
use bytes::{Bytes, BytesMut};

/// Encodes an envelope into a length-prefixed frame.
pub fn encode_envelope(
    envelope: &Envelope,
    max_frame_size: usize,
) -> Result<BytesMut, ProtocolError> {
    let payload = serde_json::to_vec(envelope)?;
    frame::encode_frame(&payload, max_frame_size)
}

/// Decodes frames from a growing byte buffer.
///
/// Data arrives from the socket in arbitrary chunks; the decoder buffers
/// it and yields complete frames as they become available.
pub struct Decoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl Decoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame payload from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        frame::decode_frame(&mut self.buffer, self.max_frame_size)
    }

    /// Attempts to decode the next envelope from the buffer.
    pub fn decode_envelope(&mut self) -> Result<Option<Envelope>, ProtocolError> {
        match self.decode_frame()? {
            Some(payload) => {
                let text =
                    std::str::from_utf8(&payload).map_err(|_| ProtocolError::InvalidUtf8)?;
                let envelope: Envelope = serde_json::from_str(text)?;
                Ok(Some(envelope))
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}
