//! Server configuration.
//!
//! Defaults first, then `JSONLRPC_*` environment variables.

use jsonlrpc_protocol::{TunnelMode, MAX_VALUE_SIZE};
use serde::{Deserialize, Serialize};

/// Per-connection serving configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Largest request value the reader will buffer.
    pub max_value_size: usize,
    /// Whether each connection must open with a tunnel upgrade.
    pub tunnel: TunnelMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_value_size: MAX_VALUE_SIZE,
            tunnel: TunnelMode::Disabled,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn with_max_value_size(mut self, max: usize) -> Self {
        self.max_value_size = max;
        self
    }

    pub fn with_tunnel(mut self, tunnel: TunnelMode) -> Self {
        self.tunnel = tunnel;
        self
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("JSONLRPC_MAX_VALUE_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_value_size = n;
            }
        }

        if std::env::var(jsonlrpc_protocol::tunnel::TUNNEL_ENV).is_ok() {
            self.tunnel = TunnelMode::from_env();
        }
    }
}
