//! Server error types.

use jsonlrpc_protocol::CodecError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("tunnel rejected: {0}")]
    TunnelRejected(String),
}

impl ServerError {
    /// Returns whether the peer simply went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ServerError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            ServerError::Codec(CodecError::ConnectionClosed) => true,
            ServerError::Codec(CodecError::Io(e)) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
