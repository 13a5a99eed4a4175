//! HTTP-style tunnel upgrade.
//!
//! When enabled, the dialer sends `CONNECT <path> HTTP/1.0` on the raw
//! connection and waits for a `200` status before any RPC traffic. Both sides
//! read the message head up to the blank line and no further, so the first
//! JSON value is never swallowed by the handshake.

use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default request path for the tunnel upgrade.
pub const DEFAULT_TUNNEL_PATH: &str = "/_jsonlrpc_";

/// Status text sent by a server accepting the upgrade.
pub const CONNECTED_STATUS: &str = "200 Connected to JSONL RPC";

/// Maximum size of a request or response head (8 KiB).
pub const MAX_HEAD_SIZE: usize = 8 * 1024;

/// Environment switch that turns the tunnel upgrade on.
pub const TUNNEL_ENV: &str = "JSONLRPC_TUNNEL";

/// Environment override for the tunnel path.
pub const TUNNEL_PATH_ENV: &str = "JSONLRPC_TUNNEL_PATH";

/// Whether the dial step upgrades the raw connection before use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum TunnelMode {
    /// Plain transport.
    #[default]
    Disabled,
    /// Upgrade with `CONNECT <path>`.
    Enabled { path: String },
}

impl TunnelMode {
    /// Tunnel on the default path.
    pub fn enabled() -> Self {
        TunnelMode::Enabled {
            path: DEFAULT_TUNNEL_PATH.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, TunnelMode::Enabled { .. })
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            TunnelMode::Disabled => None,
            TunnelMode::Enabled { path } => Some(path),
        }
    }

    /// Reads the mode from `JSONLRPC_TUNNEL` / `JSONLRPC_TUNNEL_PATH`.
    ///
    /// An unset switch means plain transport.
    pub fn from_env() -> Self {
        Self::from_env_values(
            std::env::var(TUNNEL_ENV).ok().as_deref(),
            std::env::var(TUNNEL_PATH_ENV).ok().as_deref(),
        )
    }

    /// Interprets raw switch and path values.
    pub fn from_env_values(switch: Option<&str>, path: Option<&str>) -> Self {
        let enabled = matches!(
            switch.map(|s| s.trim().to_lowercase()).as_deref(),
            Some("1" | "true" | "on" | "yes")
        );
        if !enabled {
            return TunnelMode::Disabled;
        }
        match path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(path) => TunnelMode::Enabled {
                path: path.to_string(),
            },
            None => TunnelMode::enabled(),
        }
    }
}

/// Reads an HTTP message head up to and including the blank line.
///
/// Reads one byte at a time so nothing after the head is consumed.
pub async fn read_head<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<String> {
    let mut head = Vec::with_capacity(128);
    loop {
        let byte = reader.read_u8().await?;
        head.push(byte);
        if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
            break;
        }
        if head.len() > MAX_HEAD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message head exceeds {} bytes", MAX_HEAD_SIZE),
            ));
        }
    }
    String::from_utf8(head)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "message head is not UTF-8"))
}

/// Returns the first line of a head without its line terminator.
pub fn first_line(head: &str) -> &str {
    head.lines().next().unwrap_or("").trim_end_matches('\r')
}
