//! Codec error types.

use thiserror::Error;

/// Errors raised while encoding or decoding values on the wire.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encoding error: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("decoding error: {0}")]
    Decoding(#[source] serde_json::Error),

    #[error("unexpected EOF in the middle of a JSON value")]
    UnexpectedEof,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("value too large: {size} bytes buffered (max {max})")]
    ValueTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("response body expected but no reply target was supplied")]
    MissingTarget,

    #[error("type mismatch: value is not a valid {expected}: {source}")]
    TypeMismatch {
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("row stream truncated after {rows_delivered} row(s): {source}")]
    StreamTruncated {
        rows_delivered: u64,
        #[source]
        source: Box<CodecError>,
    },
}

impl CodecError {
    /// Returns whether this error came from reading the stream (malformed
    /// JSON, EOF or a closed connection).
    pub fn is_decoding(&self) -> bool {
        matches!(
            self,
            CodecError::Decoding(_)
                | CodecError::UnexpectedEof
                | CodecError::ConnectionClosed
                | CodecError::ValueTooLarge { .. }
        )
    }

    /// Returns whether the connection must be discarded after this error.
    ///
    /// Only a missing reply target and a request body that does not fit the
    /// requested type leave the framing intact.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(
            self,
            CodecError::MissingTarget | CodecError::TypeMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_error() -> serde_json::Error {
        serde_json::from_str::<serde_json::Value>("{oops").unwrap_err()
    }

    #[test]
    fn test_decoding_classification() {
        assert!(CodecError::Decoding(json_error()).is_decoding());
        assert!(CodecError::UnexpectedEof.is_decoding());
        assert!(CodecError::ConnectionClosed.is_decoding());
        assert!(!CodecError::MissingTarget.is_decoding());
        assert!(!CodecError::Encoding(json_error()).is_decoding());
    }

    #[test]
    fn test_connection_fatal() {
        assert!(CodecError::ConnectionClosed.is_connection_fatal());
        assert!(CodecError::Protocol("seq mismatch".into()).is_connection_fatal());
        assert!(CodecError::StreamTruncated {
            rows_delivered: 1,
            source: Box::new(CodecError::UnexpectedEof),
        }
        .is_connection_fatal());

        assert!(!CodecError::MissingTarget.is_connection_fatal());
        assert!(!CodecError::TypeMismatch {
            expected: "request body",
            source: json_error(),
        }
        .is_connection_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = CodecError::ValueTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = CodecError::StreamTruncated {
            rows_delivered: 3,
            source: Box::new(CodecError::ConnectionClosed),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 row(s)"));
        assert!(msg.contains("connection closed"));
    }
}
