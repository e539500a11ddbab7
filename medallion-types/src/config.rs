//! Configuration types shared by the governor and the orchestrator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::record::DEFAULT_TENANT;
use crate::window::{BucketAlignment, IntervalSize};

/// Exponential backoff for transient stage failures.
///
/// Delay for retry `n` (0-based) is `base_delay_ms * factor^n` plus jitter,
/// capped at `max_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Exponential growth factor (>= 2).
    pub factor: u32,
    /// Random jitter percentage [0, 100] added before capping.
    pub jitter_percent: u8,
    /// Total attempts allowed per stage call, including the first.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            factor: 2,
            jitter_percent: 20,
            max_attempts: 4,
        }
    }
}

impl BackoffConfig {
    /// Check the invariants that keep delays non-decreasing and bounded.
    ///
    /// # Errors
    /// Returns `InvalidConfig` when any bound is violated.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "backoff.max_attempts must be at least 1".into(),
            ));
        }
        if self.factor < 2 {
            return Err(PipelineError::InvalidConfig(
                "backoff.factor must be at least 2".into(),
            ));
        }
        if self.jitter_percent > 100 {
            return Err(PipelineError::InvalidConfig(
                "backoff.jitter_percent must be within [0, 100]".into(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(PipelineError::InvalidConfig(
                "backoff.base_delay_ms exceeds backoff.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Circuit breaker tuning, applied per `(stage, data_type)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Transient-failure rate in [0, 1) above which the breaker opens.
    pub failure_rate_threshold: f64,
    /// Rolling window over which the rate is computed.
    pub window: Duration,
    /// Calls required in the window before the rate is evaluated.
    pub min_calls: u32,
    /// Time the breaker stays open before closing again.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            window: Duration::from_secs(30),
            min_calls: 10,
            cooldown: Duration::from_secs(15),
        }
    }
}

impl BreakerConfig {
    /// # Errors
    /// Returns `InvalidConfig` for a threshold outside [0, 1) or a zero window.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.failure_rate_threshold >= 0.0 && self.failure_rate_threshold < 1.0) {
            return Err(PipelineError::InvalidConfig(
                "breaker.failure_rate_threshold must be within [0, 1)".into(),
            ));
        }
        if self.window.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "breaker.window must be non-zero".into(),
            ));
        }
        if self.min_calls == 0 {
            return Err(PipelineError::InvalidConfig(
                "breaker.min_calls must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Streaming run tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Number of partition workers.
    pub partitions: usize,
    /// In-flight records buffered per worker before producers block or are rejected.
    pub queue_capacity: usize,
    /// Emit a result delta after this many terminal records.
    pub batch_size: usize,
    /// Emit a result delta at least this often while records are flowing.
    pub flush_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            queue_capacity: 1_024,
            batch_size: 500,
            flush_interval: Duration::from_secs(1),
        }
    }
}

impl StreamConfig {
    /// # Errors
    /// Returns `InvalidConfig` when any size is zero.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.partitions == 0 || self.queue_capacity == 0 || self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "stream partitions, queue_capacity and batch_size must be non-zero".into(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "stream.flush_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration for a `Pipeline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Tenant assigned to records that do not carry one.
    pub default_tenant: String,
    /// Aggregation bucket width.
    pub interval: IntervalSize,
    /// Aggregation bucket anchoring.
    pub alignment: BucketAlignment,
    /// How far behind the latest bucket windows are kept; `None` keeps them
    /// until evicted by hand.
    pub window_retention: Option<Duration>,
    /// Market time zone used for on-peak classification.
    pub market_tz: chrono_tz::Tz,
    /// Program whose membership drives the eligibility flag.
    pub eligibility_program: String,
    /// Retry policy for transient failures.
    pub backoff: BackoffConfig,
    /// Circuit breaker policy.
    pub breaker: BreakerConfig,
    /// Upper bound for any single governed stage call.
    pub stage_timeout: Duration,
    /// Data types processed concurrently by `run_batches`.
    pub max_concurrent_types: usize,
    /// Streaming tuning.
    pub stream: StreamConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_tenant: DEFAULT_TENANT.to_string(),
            interval: IntervalSize::FIVE_MINUTES,
            alignment: BucketAlignment::Utc,
            window_retention: Some(Duration::from_secs(24 * 60 * 60)),
            market_tz: chrono_tz::America::Los_Angeles,
            eligibility_program: "EDAM".to_string(),
            backoff: BackoffConfig::default(),
            breaker: BreakerConfig::default(),
            stage_timeout: Duration::from_secs(5),
            max_concurrent_types: 4,
            stream: StreamConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate every nested section.
    ///
    /// # Errors
    /// Returns the first `InvalidConfig` found.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.backoff.validate()?;
        self.breaker.validate()?;
        self.stream.validate()?;
        if self.stage_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "stage_timeout must be non-zero".into(),
            ));
        }
        let bucket = Duration::from_secs(u64::from(self.interval.minutes()) * 60);
        if self.window_retention.is_some_and(|r| r < bucket) {
            return Err(PipelineError::InvalidConfig(
                "window_retention must cover at least one interval".into(),
            ));
        }
        if self.max_concurrent_types == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_concurrent_types must be at least 1".into(),
            ));
        }
        if self.default_tenant.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "default_tenant must not be empty".into(),
            ));
        }
        Ok(())
    }
}
