//! # framecall-protocol
//!
//! Wire protocol for framecall.
//!
//! This crate provides:
//! - Length-prefixed message framing with a configurable size cap
//! - The control/invoke/OK/ERROR JSON envelope schema
//! - An incremental decoder for stream reassembly
//! - A framed stream wrapper with typed send/read helpers

pub mod codec;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod stream;

pub use codec::{encode_envelope, Decoder};
pub use envelope::{ConnectionOptions, Envelope, EnvelopeKind, ACTION_CONNECT, KEEP_ALIVE};
pub use error::ProtocolError;
pub use frame::{
    decode_frame, decode_wire_int, encode_frame, encode_wire_int, DEFAULT_MAX_FRAME_SIZE,
    LENGTH_PREFIX_SIZE,
};
pub use stream::FramedStream;
