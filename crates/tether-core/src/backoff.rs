//! Exponential backoff calculation.
//!
//! Two schedules share the same doubling rule but differ in capping:
//!
//! - [`retry_delay`]: delay before a request retry, `unit * 2^(k-1)` for the
//!   k-th retry. Deliberately uncapped; retry budgets are small.
//! - [`ReconnectPolicy::delay_for`]: delay before reconnect attempt `n`
//!   (0-indexed), `min(base * 2^n, cap)`.
//!
//! Both are pure and deterministic. No jitter is applied.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Request retries
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum retries for a request.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default retry backoff unit in milliseconds.
pub const DEFAULT_RETRY_UNIT_MS: u64 = 1000;

/// Delay before the `retry`-th retry (1-based).
///
/// The first retry waits one unit, the second two, the third four. A `retry`
/// of 0 (the initial attempt) waits nothing.
#[must_use]
pub fn retry_delay(retry: u32, unit: Duration) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }
    unit.saturating_mul(doubling(retry - 1))
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconnection
// ─────────────────────────────────────────────────────────────────────────────

/// Default reconnect base interval in milliseconds.
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 5000;
/// Default reconnect cap in milliseconds.
pub const DEFAULT_RECONNECT_CAP_MS: u64 = 30_000;
/// Default maximum reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Reconnection schedule. The multiplier is fixed at 2.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Attempts allowed before settling in `Disconnected`.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy.
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Delay before attempt `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(doubling(attempt)).min(self.cap)
    }

    /// Whether another attempt is permitted after `attempts_made`.
    #[must_use]
    pub fn permits(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            cap: Duration::from_millis(DEFAULT_RECONNECT_CAP_MS),
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// `2^exp`, saturating at `u32::MAX`.
fn doubling(exp: u32) -> u32 {
    1u32.checked_shl(exp).unwrap_or(u32::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
