//! Framed message transport over a connected byte stream.
//!
//! [`FramedStream`] pairs a socket with a [`Decoder`] and exposes the
//! message-level contract: a send writes one complete frame, a read
//! blocks until one complete frame has arrived (bounded by the read
//! timeout). Typed helpers encode text, wire integers, and JSON
//! envelopes as frame payloads.

use crate::codec::Decoder;
use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::frame::{self, DEFAULT_MAX_FRAME_SIZE};
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read buffer size for socket reads (8 KiB).
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// A message-framing wrapper around a connected byte stream.
pub struct FramedStream<S> {
    stream: S,
    decoder: Decoder,
    read_timeout: Duration,
    max_frame_size: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    /// Wraps a connected stream with the default frame size cap.
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self::with_max_frame_size(stream, read_timeout, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(
        stream: S,
        read_timeout: Duration,
        max_frame_size: usize,
    ) -> Self {
        Self {
            stream,
            decoder: Decoder::new(max_frame_size),
            read_timeout,
            max_frame_size,
        }
    }

    /// Sets the read timeout, returning the previous value.
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Duration {
        std::mem::replace(&mut self.read_timeout, timeout)
    }

    /// Sends one length-prefixed frame.
    ///
    /// The prefix and payload are written as a single contiguous buffer,
    /// so a frame is never interleaved with another send on this stream.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let buf = frame::encode_frame(payload, self.max_frame_size)?;
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads one complete frame payload.
    ///
    /// Blocks until the full declared length has arrived. Each socket
    /// read is bounded by the configured read timeout; a peer that
    /// closes mid-frame (or before any data) yields
    /// [`ProtocolError::UnexpectedEof`].
    pub async fn read_frame(&mut self) -> Result<Bytes, ProtocolError> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            if let Some(payload) = self.decoder.decode_frame()? {
                return Ok(payload);
            }

            let n = tokio::time::timeout(self.read_timeout, self.stream.read(&mut buf))
                .await
                .map_err(|_| ProtocolError::ReadTimeout)??;
            if n == 0 {
                return Err(ProtocolError::UnexpectedEof);
            }
            self.decoder.extend(&buf[..n]);
        }
    }

    /// Sends a UTF-8 text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        self.send_frame(text.as_bytes()).await
    }

    /// Reads a UTF-8 text frame.
    pub async fn read_text(&mut self) -> Result<String, ProtocolError> {
        let payload = self.read_frame().await?;
        String::from_utf8(payload.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Sends an integer in its fixed 4-byte wire form.
    pub async fn send_int(&mut self, value: i32) -> Result<(), ProtocolError> {
        self.send_frame(&frame::encode_wire_int(value)).await
    }

    /// Reads an integer from its fixed 4-byte wire form.
    pub async fn read_int(&mut self) -> Result<i32, ProtocolError> {
        let payload = self.read_frame().await?;
        let bytes: [u8; 4] = payload
            .as_ref()
            .try_into()
            .map_err(|_| ProtocolError::IntFrameLength(payload.len()))?;
        Ok(frame::decode_wire_int(bytes))
    }

    /// Sends a JSON envelope frame.
    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(envelope)?;
        self.send_frame(&payload).await
    }

    /// Reads a JSON envelope frame.
    pub async fn read_envelope(&mut self) -> Result<Envelope, ProtocolError> {
        let text = self.read_text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Shuts down the write half of the stream.
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Consumes the wrapper, returning the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}
