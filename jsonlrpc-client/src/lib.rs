//! # jsonlrpc-client
//!
//! Client library for jsonlrpc.
//!
//! This crate provides:
//! - The client role of the wire codec, including row draining
//! - A call driver that serializes calls over one connection
//! - A shared, swappable connection handle
//! - Reconnection with exponential backoff and jitter
//! - Optional tunnel upgrade on dial

pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod reconnect;
pub mod tunnel;

pub use client::{Client, ClientDialer};
pub use codec::ClientCodec;
pub use connection::{ClientConfig, ConnectionHandle, Dialer, TcpDialer};
pub use error::ClientError;
pub use reconnect::{reconnect, BackoffPolicy, ReconnectConfig, Reconnector};
