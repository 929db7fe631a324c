//! Jittered exponential backoff shared by snapshot reads and feed reconnects.
//!
//! ```text
//! attempt    delay (initial=1s, cap=30s)    with jitter (±20%)
//! ───────────────────────────────────────────────────────────
//!    0               1s                      0.8s - 1.2s
//!    1               2s                      1.6s - 2.4s
//!    2               4s                      3.2s - 4.8s
//!    3               8s                      6.4s - 9.6s
//!    4              16s                     12.8s - 19.2s
//!   >4              30s                     24s - 30s
//! ```
//!
//! Retries never give up; only individual attempts are time-bounded.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_JITTER_FACTOR: f64 = 0.2;
const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 10_000;

/// Largest exponent applied before the cap takes over anyway.
const MAX_EXPONENT: u32 = 20;

/// Retry schedule for reads and subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay, jitter included.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Jitter as a fraction of the delay (0.0-1.0).
    #[serde(default = "default_jitter")]
    pub jitter_factor: f64,

    /// Time allowed for one read or subscribe attempt.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_ms: u64,
}

fn default_initial_delay() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}

fn default_max_delay() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_jitter() -> f64 {
    DEFAULT_JITTER_FACTOR
}

fn default_attempt_timeout() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
        }
    }
}

impl std::fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RetryPolicy(initial={}ms, max={}ms, jitter={:.0}%, attempt_timeout={}ms)",
            self.initial_delay_ms,
            self.max_delay_ms,
            self.jitter_factor * 100.0,
            self.attempt_timeout_ms
        )
    }
}

impl RetryPolicy {
    /// 1s doubling to a 30s cap, ±20% jitter, 10s per attempt.
    pub fn standard() -> Self {
        Self::default()
    }

    pub fn new(initial_delay: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            initial_delay_ms: duration_ms(initial_delay),
            max_delay_ms: duration_ms(max_delay),
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            ..Self::default()
        }
    }

    /// Sets the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = duration_ms(timeout);
        self
    }

    /// Returns the delay to wait after failed attempt number `attempt` (0-indexed).
    ///
    /// `min(initial * 2^attempt, max)` spread by the jitter factor, never above `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(MAX_EXPONENT);
        let delay = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);

        let jitter_range = (delay as f64 * self.jitter_factor.clamp(0.0, 1.0)) as u64;
        let jittered = if jitter_range > 0 {
            let offset = rand::thread_rng().gen_range(0..=jitter_range.saturating_mul(2));
            delay.saturating_sub(jitter_range).saturating_add(offset)
        } else {
            delay
        };

        Duration::from_millis(jittered.min(self.max_delay_ms))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
