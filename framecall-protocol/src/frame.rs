//! Length-prefixed frame format.
//!
//! Frame layout (4-byte header + payload):
//!
//! ```text
//! +-------------+------------------+
//! | payload_len | payload          |
//! |   4 bytes   | payload_len bytes|
//! +-------------+------------------+
//! ```
//!
//! The length field is a big-endian `u32` giving the exact byte length
//! of the payload. A reader never yields a partial frame: it waits until
//! the full declared length has arrived, and it rejects declared lengths
//! above a configured cap before buffering them.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame payload size (2 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// Encodes a payload into a length-prefixed frame.
pub fn encode_frame(payload: &[u8], max_frame_size: usize) -> Result<BytesMut, ProtocolError> {
    if payload.len() > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: max_frame_size,
        });
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf)
}

/// Decodes the next frame payload from the buffer.
///
/// Returns `Ok(Some(payload))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` if the declared length
/// exceeds `max_frame_size`. The size check happens before any payload
/// bytes are consumed, so an oversized declaration never causes a large
/// allocation.
pub fn decode_frame(
    buf: &mut BytesMut,
    max_frame_size: usize,
) -> Result<Option<Bytes>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if declared > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size: declared,
            max: max_frame_size,
        });
    }

    if buf.len() < LENGTH_PREFIX_SIZE + declared {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    Ok(Some(buf.split_to(declared).freeze()))
}

/// Encodes an `i32` into its 4-byte big-endian wire form.
///
/// Must be the exact inverse of [`decode_wire_int`] for every value in
/// the 32-bit signed range.
pub fn encode_wire_int(value: i32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Decodes an `i32` from its 4-byte big-endian wire form.
pub fn decode_wire_int(buf: [u8; 4]) -> i32 {
    i32::from_be_bytes(buf)
}
