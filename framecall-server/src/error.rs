//! Server error types.

use framecall_protocol::ProtocolError;
use thiserror::Error;

/// Errors internal to the callee runtime.
///
/// Application failures (unregistered targets, handler errors) are
/// answered in-band as `ERROR` envelopes and never appear here.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server shutting down")]
    ShuttingDown,
}
