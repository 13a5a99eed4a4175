//! Client error types.

use jsonlrpc_protocol::CodecError;
use std::time::Duration;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    #[error("tunnel handshake failed: {0}")]
    TunnelHandshake(String),

    #[error("not connected")]
    NotConnected,

    #[error("response seq {got} does not match request seq {expected}")]
    SeqMismatch { expected: u64, got: u64 },

    #[error("remote error from {method}: {message}")]
    Remote { method: String, message: String },

    #[error("reconnect gave up after {attempts} attempt(s): {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
}

impl ClientError {
    /// Returns whether this error happened while establishing the transport.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Dial { .. } | ClientError::ConnectTimeout(_) | ClientError::TunnelHandshake(_)
        )
    }

    /// Returns whether the connection must be replaced after this error.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            ClientError::Codec(e) => e.is_connection_fatal(),
            ClientError::Remote { .. } => false,
            _ => true,
        }
    }

    /// Returns whether retrying on a fresh connection may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Codec(e) => e.is_decoding() || matches!(e, CodecError::Io(_)),
            ClientError::Dial { .. } => true,
            ClientError::ConnectTimeout(_) => true,
            ClientError::NotConnected => true,
            _ => false,
        }
    }
}
