//! Client error types.

use framecall_protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the caller runtime.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("correlation id mismatch: sent {sent}, reply carried {received:?}")]
    CorrelationMismatch { sent: u64, received: Option<u64> },

    #[error("unexpected reply type: {0}")]
    UnexpectedReplyType(String),
}

impl ClientError {
    /// Returns whether this error belongs to the transport/framing class.
    ///
    /// Only these are eligible for the single retry on a cached
    /// connection; protocol violations and remote application errors
    /// surface immediately.
    pub fn is_transport(&self) -> bool {
        match self {
            ClientError::Io(_) | ClientError::ConnectTimeout => true,
            ClientError::Protocol(p) => p.is_transport(),
            _ => false,
        }
    }
}
