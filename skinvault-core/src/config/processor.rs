//! Tunables for the trade processing loop.

use rust_decimal::Decimal;
use std::time::Duration;

/// Default number of failed attempts before a trade is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Fallback USD price of one native unit, used when the rate feed fails.
pub const DEFAULT_FALLBACK_RATE: Decimal = Decimal::from_parts(3500, 0, 0, false, 0);

/// Processing loop configuration.
///
/// Re-read at the top of every iteration, so a reload takes effect on the
/// next trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// How long an idle loop waits before polling the queue again.
    pub poll_interval: Duration,
    /// Delay before a requeued trade is retried.
    pub retry_backoff: Duration,
    /// Failed attempts allowed before dead-lettering. `0` retries forever.
    pub max_attempts: u32,
    /// Upper bound on every external call made while processing a trade.
    pub call_timeout: Duration,
    /// Rate used when the live rate is unavailable or not positive.
    pub fallback_rate: Decimal,
}

impl ProcessorConfig {
    /// Whether a trade that has already failed `attempts` times should be
    /// given up on after failing once more.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts.saturating_add(1) >= self.max_attempts
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(5),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            call_timeout: Duration::from_secs(30),
            fallback_rate: DEFAULT_FALLBACK_RATE,
        }
    }
}
