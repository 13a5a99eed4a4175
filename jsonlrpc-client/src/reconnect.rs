//! Reconnection with exponential backoff.
//!
//! Dial attempts run one after another from a single task. A successful dial
//! is installed into a [`ConnectionHandle`] shared with every caller that
//! issues traffic; failures sleep for a jittered, exponentially growing delay.

use crate::client::ClientDialer;
use crate::connection::{ClientConfig, ConnectionHandle, Dialer};
use crate::error::ClientError;
use crate::Client;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Exponential backoff with multiplicative jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay after the first failure, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound before jitter, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth per failed attempt.
    pub factor: f64,
    /// Jitter fraction; the delay is scaled by a factor in `1 ± jitter`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 120_000,
            factor: 1.6,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the base delay as Duration.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Returns the maximum delay as Duration.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Upper bound of any delay this policy can produce.
    pub fn max_jittered(&self) -> Duration {
        secs_to_duration(self.max_delay().as_secs_f64() * (1.0 + self.jitter.abs()))
    }

    /// Delay before retrying after failed attempt `attempt`, without jitter.
    ///
    /// Attempt 0 waits exactly the base delay. Later attempts multiply the
    /// base by `factor` once per attempt, stopping early once the maximum is
    /// reached, and clamp to the maximum.
    pub fn unjittered(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.base_delay();
        }
        let max = self.max_delay().as_secs_f64();
        let mut delay = self.base_delay().as_secs_f64();
        let mut remaining = attempt;
        while delay < max && remaining > 0 {
            delay *= self.factor;
            remaining -= 1;
        }
        secs_to_duration(delay.min(max))
    }

    /// Delay before retrying after failed attempt `attempt`.
    ///
    /// Jitter is drawn uniformly from `[-1, 1]` and applied only for
    /// `attempt > 0`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_with(attempt, unit)
    }

    /// Same as [`delay`](Self::delay) with the jitter draw supplied by the
    /// caller. `unit` is clamped to `[-1, 1]`.
    pub fn delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let delay = self.unjittered(attempt);
        if attempt == 0 {
            return delay;
        }
        let scale = 1.0 + self.jitter * unit.clamp(-1.0, 1.0);
        secs_to_duration(delay.as_secs_f64() * scale)
    }
}

/// Negative, NaN and overflowing values collapse to zero or the maximum.
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Retry bound and backoff for the reconnect loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Dial attempts before giving up.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ReconnectConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies `JSONLRPC_MAX_RETRY` and `JSONLRPC_BACKOFF_*` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(max) = std::env::var("JSONLRPC_MAX_RETRY") {
            if let Ok(n) = max.parse() {
                self.max_attempts = n;
            }
        }

        if let Ok(base) = std::env::var("JSONLRPC_BACKOFF_BASE_MS") {
            if let Ok(ms) = base.parse() {
                self.backoff.base_delay_ms = ms;
            }
        }

        if let Ok(max) = std::env::var("JSONLRPC_BACKOFF_MAX_MS") {
            if let Ok(ms) = max.parse() {
                self.backoff.max_delay_ms = ms;
            }
        }
    }
}

/// Re-establishes a connection and installs it into a shared handle.
///
/// Only one reconnect should run per handle at a time; concurrent runs race
/// on the install.
pub struct Reconnector<D: Dialer> {
    dialer: D,
    config: ReconnectConfig,
}

impl<D: Dialer> Reconnector<D> {
    pub fn new(dialer: D, config: ReconnectConfig) -> Self {
        Self { dialer, config }
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Dials until success or until `max_attempts` dials have failed.
    ///
    /// On success the new connection is installed and returned. There is no
    /// sleep after the last failed attempt.
    pub async fn reconnect(
        &self,
        handle: &ConnectionHandle<D::Connection>,
    ) -> Result<Arc<D::Connection>, ClientError> {
        let max_attempts = self.config.max_attempts;
        let target = self.dialer.target();
        let mut last_error = String::from("no attempts made");

        for attempt in 0..max_attempts {
            match self.dialer.dial().await {
                Ok(conn) => {
                    let conn = Arc::new(conn);
                    let generation = handle.install_arc(Arc::clone(&conn));
                    tracing::info!(
                        "Reconnected to {} after {} attempt(s) (generation {})",
                        target,
                        attempt + 1,
                        generation
                    );
                    return Ok(conn);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 == max_attempts {
                        break;
                    }
                    let delay = self.config.backoff.delay(attempt);
                    tracing::debug!(
                        "Reconnect attempt {}/{} to {} failed: {}; retrying in {:?}",
                        attempt + 1,
                        max_attempts,
                        target,
                        last_error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        tracing::warn!(
            "Giving up on {} after {} attempt(s): {}",
            target,
            max_attempts,
            last_error
        );
        Err(ClientError::RetryExhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}

/// Redials `config.addr` with the default backoff and installs a fresh
/// [`Client`] into `handle`.
pub async fn reconnect(
    handle: &ConnectionHandle<Client>,
    max_attempts: u32,
    config: ClientConfig,
) -> Result<Arc<Client>, ClientError> {
    Reconnector::new(ClientDialer::new(config), ReconnectConfig::new(max_attempts))
        .reconnect(handle)
        .await
}
