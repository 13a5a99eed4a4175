//! Connection establishment and the shared connection slot.

use crate::error::ClientError;
use crate::tunnel::negotiate;
use jsonlrpc_protocol::{TunnelMode, DEFAULT_PORT, MAX_VALUE_SIZE};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address (`host:port`).
    pub addr: String,
    /// Dial timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Disable Nagle's algorithm on the socket.
    pub nodelay: bool,
    /// Largest JSON value the reader will buffer.
    pub max_value_size: usize,
    /// Tunnel upgrade performed right after dialing.
    pub tunnel: TunnelMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            connect_timeout_ms: 10_000,
            nodelay: true,
            max_value_size: MAX_VALUE_SIZE,
            tunnel: TunnelMode::Disabled,
        }
    }
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_max_value_size(mut self, max: usize) -> Self {
        self.max_value_size = max;
        self
    }

    pub fn with_tunnel(mut self, tunnel: TunnelMode) -> Self {
        self.tunnel = tunnel;
        self
    }

    /// Returns the dial timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Applies `JSONLRPC_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("JSONLRPC_ADDR") {
            if !addr.is_empty() {
                self.addr = addr;
            }
        }

        if let Ok(timeout) = std::env::var("JSONLRPC_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.connect_timeout_ms = ms;
            }
        }

        if std::env::var(jsonlrpc_protocol::tunnel::TUNNEL_ENV).is_ok() {
            self.tunnel = TunnelMode::from_env();
        }
    }
}

/// Something that can produce a fresh connection.
pub trait Dialer: Send + Sync {
    type Connection: Send + Sync + 'static;

    fn dial(&self) -> impl Future<Output = Result<Self::Connection, ClientError>> + Send;

    /// Human-readable target, used in log lines.
    fn target(&self) -> String;
}

/// Dials TCP, optionally upgrading through the tunnel handshake.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    config: ClientConfig,
}

impl TcpDialer {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connects and, when enabled, negotiates the tunnel.
    ///
    /// The connect and the handshake each get `connect_timeout`. A stream
    /// that fails the handshake is dropped, closing it.
    pub async fn connect(&self) -> Result<TcpStream, ClientError> {
        let addr = &self.config.addr;
        let timeout = self.config.connect_timeout();
        tracing::debug!("Connecting to {}...", addr);

        let mut stream = tokio::time::timeout(timeout, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::ConnectTimeout(timeout)
            })?
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                dial_failed(addr, e)
            })?;

        stream
            .set_nodelay(self.config.nodelay)
            .map_err(|e| dial_failed(addr, e))?;

        if let Some(path) = self.config.tunnel.path() {
            tokio::time::timeout(timeout, negotiate(&mut stream, path))
                .await
                .map_err(|_| {
                    tracing::debug!("Tunnel handshake timeout");
                    ClientError::TunnelHandshake(format!("no response within {:?}", timeout))
                })??;
        }

        tracing::debug!("Connected to {}", addr);
        Ok(stream)
    }
}

/// Any socket failure before the stream is handed out counts as a dial failure.
fn dial_failed(addr: &str, source: std::io::Error) -> ClientError {
    ClientError::Dial {
        addr: addr.to_string(),
        source,
    }
}

impl Dialer for TcpDialer {
    type Connection = TcpStream;

    fn dial(&self) -> impl Future<Output = Result<TcpStream, ClientError>> + Send {
        self.connect()
    }

    fn target(&self) -> String {
        self.config.addr.clone()
    }
}

/// Shared, swappable slot holding the active connection.
///
/// Clones share the same slot. Readers take a snapshot `Arc` and never block
/// a writer for longer than the swap itself. Each install bumps a generation
/// counter so a caller can tell whether the connection it used is still the
/// current one.
pub struct ConnectionHandle<C> {
    inner: Arc<HandleInner<C>>,
}

struct HandleInner<C> {
    slot: RwLock<Option<Arc<C>>>,
    generation: AtomicU64,
}

impl<C> ConnectionHandle<C> {
    /// Creates an empty handle.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                slot: RwLock::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a handle already holding `conn`.
    pub fn with_connection(conn: C) -> Self {
        let handle = Self::new();
        handle.install(conn);
        handle
    }

    /// Returns the current connection, if any.
    pub fn current(&self) -> Option<Arc<C>> {
        self.inner.slot.read().clone()
    }

    /// Replaces the current connection and returns the new generation.
    pub fn install(&self, conn: C) -> u64 {
        self.install_arc(Arc::new(conn))
    }

    pub(crate) fn install_arc(&self, conn: Arc<C>) -> u64 {
        let mut slot = self.inner.slot.write();
        *slot = Some(conn);
        self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Installs `conn` only if no other install happened since `expected`.
    ///
    /// Returns the connection back when the generation moved on.
    pub fn compare_and_install(&self, expected: u64, conn: C) -> Result<u64, C> {
        let mut slot = self.inner.slot.write();
        if self.inner.generation.load(Ordering::Acquire) != expected {
            return Err(conn);
        }
        *slot = Some(Arc::new(conn));
        Ok(self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Empties the slot, returning what it held.
    pub fn take(&self) -> Option<Arc<C>> {
        self.inner.slot.write().take()
    }

    /// Empties the slot.
    pub fn clear(&self) {
        self.take();
    }

    /// Number of installs performed so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.slot.read().is_some()
    }
}

impl<C> Clone for ConnectionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Default for ConnectionHandle<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for ConnectionHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("connected", &self.is_connected())
            .field("generation", &self.generation())
            .finish()
    }
}
