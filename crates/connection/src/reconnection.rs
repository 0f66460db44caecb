//! Reconnection policy: backoff configuration and the cancellable timer.
//!
//! The policy only answers "how long until the next attempt" and "should we
//! give up". The decision to reconnect at all belongs to the state machine,
//! which asks on every unsolicited close.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use tether_protocol::constants::DEFAULT_RECONNECT_DELAY;

use crate::config::ConfigError;
use crate::machine::TimerId;

/// Backoff configuration for automatic reconnection.
///
/// The default is a flat 5000 ms delay with unlimited attempts.
/// [`ReconnectConfig::exponential`] is the recommended production policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    #[serde(alias = "initialDelayMs")]
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay.
    #[serde(alias = "maxDelayMs")]
    pub max_delay_ms: u64,
    /// Factor applied per consecutive failed attempt.
    pub multiplier: f64,
    /// Consecutive failed attempts allowed before giving up. `None` retries forever.
    #[serde(alias = "maxAttempts")]
    pub max_attempts: Option<u32>,
    /// Extra random delay as a fraction of the base delay, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectConfig {
    /// Flat delay between attempts, retrying forever.
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            initial_delay_ms: ms,
            max_delay_ms: ms,
            multiplier: 1.0,
            max_attempts: None,
            jitter: 0.0,
        }
    }

    /// Exponential backoff with jitter and a retry cap.
    pub fn exponential() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: Some(10),
            jitter: 0.2,
        }
    }

    /// Calculates the delay for a given attempt number (1-based).
    ///
    /// Jitter only ever adds time, so the result is never shorter than the
    /// un-jittered base and never longer than `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let max = self.max_delay_ms as f64;
        let base = (self.initial_delay_ms as f64 * self.multiplier.powi(exp)).min(max);
        let with_jitter = if self.jitter > 0.0 {
            (base + base * self.jitter * jitter_sample()).min(max)
        } else {
            base
        };
        Duration::from_millis(with_jitter.round() as u64)
    }

    /// Returns `true` when `attempt` is past the configured retry cap.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "reconnect multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "reconnect max_delay_ms ({}) is below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(format!(
                "reconnect jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

/// Uniform-ish sample in `[0, 1)` taken from the clock's sub-second nanos.
fn jitter_sample() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    nanos as f64 / 1_000_000_000.0
}

/// A scheduled, cancellable one-shot timer.
///
/// Dropping the timer cancels it, so replacing the single timer slot in the
/// manager can never leave a stale retry behind.
pub(crate) struct ReconnectTimer {
    id: TimerId,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl ReconnectTimer {
    /// Spawns a task on `runtime` that calls `on_fire` after `delay` unless
    /// cancelled first.
    pub(crate) fn schedule<F>(runtime: &tokio::runtime::Handle, id: TimerId, delay: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    trace!(timer = id.0, "timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    if !token.is_cancelled() {
                        on_fire();
                    }
                }
            }
        });
        Self { id, cancel, handle }
    }

    pub(crate) fn id(&self) -> TimerId {
        self.id
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}
