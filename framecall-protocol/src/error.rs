//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or envelope handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("read timed out")]
    ReadTimeout,

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("integer frame has wrong length: {0} bytes (expected 4)")]
    IntFrameLength(usize),

    #[error("missing required envelope field: {0}")]
    MissingField(&'static str),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether this error belongs to the transport/framing class.
    ///
    /// Transport and framing failures on a cached connection are eligible
    /// for the caller's single-retry policy; everything else indicates a
    /// logic or application problem and surfaces immediately.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::ReadTimeout
                | ProtocolError::UnexpectedEof
                | ProtocolError::FrameTooLarge { .. }
        )
    }
}
