//! Exponential backoff with bounded additive jitter.

use std::time::Duration;

use medallion_types::BackoffConfig;
use rand::Rng;

/// Add up to `jitter_percent` of `base_ms` on top of it.
///
/// A zero percentage (or a base too small to carry any jitter) returns `base_ms`.
#[must_use]
pub fn jitter_wait(base_ms: u64, jitter_percent: u32) -> u64 {
    let jitter_range = if jitter_percent == 0 {
        1
    } else {
        std::cmp::max(1, base_ms.saturating_mul(u64::from(jitter_percent)) / 100)
    };
    let mut rng = rand::rng();
    base_ms.saturating_add(rng.random_range(0..jitter_range))
}

/// Retry delay schedule derived from a [`BackoffConfig`].
///
/// The wait before retry `n` (zero-based) is `base * factor^n` plus jitter,
/// then capped at `max_delay_ms`. With `factor >= 2` and jitter at most 100%
/// the schedule is non-decreasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    /// Policy over a validated configuration.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Total attempts allowed per governed call, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Upper bound for any single delay.
    #[must_use]
    pub const fn cap(&self) -> Duration {
        Duration::from_millis(self.config.max_delay_ms)
    }

    /// Un-jittered, un-capped delay before retry `retry`, in milliseconds.
    #[must_use]
    pub fn nominal_ms(&self, retry: u32) -> u64 {
        let growth = u64::from(self.config.factor).saturating_pow(retry);
        self.config.base_delay_ms.saturating_mul(growth)
    }

    /// Smallest and largest delay [`Self::delay_for`] can return for `retry`.
    #[must_use]
    pub fn bounds(&self, retry: u32) -> (Duration, Duration) {
        let nominal = self.nominal_ms(retry);
        let spread = nominal.saturating_mul(u64::from(self.config.jitter_percent)) / 100;
        let lo = nominal.min(self.config.max_delay_ms);
        let hi = nominal
            .saturating_add(spread)
            .min(self.config.max_delay_ms);
        (Duration::from_millis(lo), Duration::from_millis(hi))
    }

    /// Jittered, capped delay before retry `retry`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let nominal = self.nominal_ms(retry);
        if nominal >= self.config.max_delay_ms {
            return self.cap();
        }
        let jittered = jitter_wait(nominal, u32::from(self.config.jitter_percent));
        Duration::from_millis(jittered.min(self.config.max_delay_ms))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
