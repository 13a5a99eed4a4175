//! # jsonlrpc-protocol
//!
//! Wire protocol implementation for jsonlrpc.
//!
//! This crate provides:
//! - Request/response envelope and reply body types
//! - A streaming reader/writer for concatenated JSON values
//! - The result-row protocol: rows following a reply, closed by a `null` sentinel
//! - Tunnel upgrade helpers shared by both ends
//! - Codec error types

pub mod codec;
pub mod error;
pub mod message;
pub mod rows;
pub mod tunnel;

pub use codec::{encode_value, ValueDecoder, ValueReader, ValueWriter};
pub use error::CodecError;
pub use message::{
    ClientReply, ReplyBody, ReplyStatus, RequestHeader, ResponseHeader, ServerReply,
};
pub use rows::{drain_rows, emit_rows, Row, RowSink, RowSource};
pub use tunnel::TunnelMode;

/// Default port for jsonlrpc servers.
pub const DEFAULT_PORT: u16 = 7411;

/// Maximum size of a single buffered JSON value (16 MiB).
pub const MAX_VALUE_SIZE: usize = 16 * 1024 * 1024;
