//! # jsonlrpc
//!
//! JSON-lines RPC codec with result rows streamed in-band after a reply, and
//! reconnect supervision for the client side.
//!
//! A call is two JSON values each way: a header and a body. A reply body with
//! `has-jsonls` set is followed by row values and a closing `null`.
//!
//! ```no_run
//! use jsonlrpc::client::{Client, ClientConfig};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), jsonlrpc::client::ClientError> {
//! let client = Client::dial(&ClientConfig::new("127.0.0.1:7411")).await?;
//! let sum: i64 = client.call_result("Calc.Add", &json!({"a": 2, "b": 3})).await?;
//! let (_reply, rows) = client.call_collect("Db.Query", &json!({"table": "t"})).await?;
//! # let _ = (sum, rows);
//! # Ok(())
//! # }
//! ```

pub use jsonlrpc_client as client;
pub use jsonlrpc_protocol as protocol;
pub use jsonlrpc_server as server;

pub use jsonlrpc_client::{
    reconnect, BackoffPolicy, Client, ClientConfig, ClientError, ConnectionHandle,
    ReconnectConfig, Reconnector,
};
pub use jsonlrpc_protocol::{
    ClientReply, CodecError, Row, RowSink, RowSource, ServerReply, TunnelMode,
};
pub use jsonlrpc_server::{serve_connection, ServerConfig, ServerError, Service};
