//! # jsonlrpc-server
//!
//! Server library for jsonlrpc.
//!
//! This crate provides:
//! - The server role of the wire codec, including row emission
//! - A `Service` trait and a loop serving one connection
//! - Tunnel upgrade acceptance
//!
//! Accepting connections is left to the caller.

pub mod codec;
pub mod config;
pub mod error;
pub mod server;
pub mod tunnel;

pub use codec::ServerCodec;
pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{serve_connection, serve_connection_with_config, Service};
pub use tunnel::accept_tunnel;
