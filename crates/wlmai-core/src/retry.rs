//! Retry configuration and backoff calculation.
//!
//! Portable, sync-only building blocks. The async retry loop that sleeps
//! between handshake attempts lives in `wlmai-chat`.
//!
//! - [`RetryConfig`]: attempt budget, delays, jitter, strategy
//! - [`BackoffStrategy`]: fixed delay (default) or exponential growth
//! - [`calculate_backoff_delay_with_random`]: delay for a given retry

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of handshake attempts (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default delay between attempts in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default cap for exponential delays in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0). Zero keeps the fixed cadence exact.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.0;

/// How the delay grows between attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// `base * 2^retry`, capped at the max delay.
    Exponential,
}

/// Configuration for connection retries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total handshake attempts before giving up (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in ms (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single delay in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0 (default: 0.0).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Delay growth (default: fixed).
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            strategy: BackoffStrategy::Fixed,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with jitter, same budget.
    #[must_use]
    pub fn exponential(jitter_factor: f64) -> Self {
        Self {
            jitter_factor,
            strategy: BackoffStrategy::Exponential,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (zero-based: 0 is the wait after
    /// the first failed attempt).
    ///
    /// `random` should be a value in `[0.0, 1.0)` from a PRNG.
    #[must_use]
    pub fn delay_ms(&self, retry: u32, random: f64) -> u64 {
        calculate_backoff_delay_with_random(
            retry,
            self.strategy,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate a backoff delay with explicit randomness.
///
/// Fixed: `base`. Exponential: `min(max, base * 2^retry)`.
/// Jitter maps `random` from `[0,1)` to `[-jitter, +jitter]` around that value.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    retry: u32,
    strategy: BackoffStrategy,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let raw = match strategy {
        BackoffStrategy::Fixed => base_delay_ms,
        BackoffStrategy::Exponential => base_delay_ms.saturating_mul(1u64 << retry.min(31)),
    };
    let capped = raw.min(max_delay_ms);

    if jitter_factor <= 0.0 {
        return capped;
    }

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor.min(1.0);
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
