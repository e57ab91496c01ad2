//! Connection lifecycle tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wlmai_core::RetryConfig;

/// Retry and readiness budgets for the streaming connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Handshake retry policy.
    pub retry: RetryConfig,
    /// Readiness check granularity in milliseconds.
    pub ready_poll_interval_ms: u64,
    /// Number of readiness intervals before an attempt counts as failed.
    pub ready_poll_attempts: u32,
    /// Capacity of the outbound frame channel.
    pub outbound_buffer: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            ready_poll_interval_ms: 100,
            ready_poll_attempts: 20,
            outbound_buffer: 64,
        }
    }
}

impl ConnectionSettings {
    /// Total time one attempt may take to become ready.
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(
            self.ready_poll_interval_ms
                .saturating_mul(u64::from(self.ready_poll_attempts)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ready_budget_is_two_seconds() {
        assert_eq!(ConnectionSettings::default().ready_timeout(), Duration::from_secs(2));
    }
}
