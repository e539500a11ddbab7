//! Run summaries and dead-letter descriptors produced by the orchestrator.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, PipelineError};
use crate::record::RecordId;

/// Pipeline stage at which a record is processed or fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Intake, before normalization starts.
    Receive,
    /// Bronze -> Silver.
    Normalize,
    /// Silver -> Gold.
    Enrich,
    /// Gold -> window accumulators.
    Aggregate,
    /// Sink writes.
    Publish,
}

impl Stage {
    /// Stable label for logs, breaker keys and topics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Normalize => "normalize",
            Self::Enrich => "enrich",
            Self::Aggregate => "aggregate",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context written to the dead-letter path on permanent failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Stage that raised the permanent failure.
    pub stage: Stage,
    /// Data type tag of the failed record.
    pub data_type: String,
    /// Identity of the failed Bronze record.
    pub record_identity: RecordId,
    /// Classification of the final error.
    pub error_kind: ErrorKind,
    /// Rendered error message.
    pub message: String,
    /// Attempts spent on the failing stage.
    pub attempt_count: u32,
    /// When the record was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Describe a permanent failure.
    pub fn new(
        stage: Stage,
        data_type: impl Into<String>,
        record_identity: RecordId,
        error: &PipelineError,
        attempt_count: u32,
    ) -> Self {
        Self {
            stage,
            data_type: data_type.into(),
            record_identity,
            error_kind: error.kind(),
            message: error.to_string(),
            attempt_count,
            failed_at: Utc::now(),
        }
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// No permanent failure occurred.
    #[default]
    Success,
    /// At least one record was dead-lettered.
    Partial,
}

/// Per-invocation summary returned by batch runs and emitted as streaming deltas.
///
/// Every received record is counted exactly once as either `success`
/// (published) or `dead_lettered`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineRunResult {
    data_type: Option<String>,
    status: RunStatus,
    received: u64,
    success: u64,
    dead_lettered: u64,
    normalization_errors: u64,
    enrichment_applied: u64,
    gold_records: u64,
    aggregated: u64,
    retries: u64,
    errors: Vec<ErrorRecord>,
    elapsed: Duration,
}

impl PipelineRunResult {
    /// Data type tag this result covers; `None` for merged multi-type totals.
    #[must_use]
    pub fn data_type(&self) -> Option<&str> {
        self.data_type.as_deref()
    }

    /// `Success` iff nothing was dead-lettered.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Records handed to the run.
    #[must_use]
    pub const fn received(&self) -> u64 {
        self.received
    }

    /// Records that reached `PUBLISHED`.
    #[must_use]
    pub const fn success(&self) -> u64 {
        self.success
    }

    /// Records that reached `DEAD_LETTERED`.
    #[must_use]
    pub const fn dead_lettered(&self) -> u64 {
        self.dead_lettered
    }

    /// Dead letters raised at the normalize stage.
    #[must_use]
    pub const fn normalization_errors(&self) -> u64 {
        self.normalization_errors
    }

    /// Gold records whose reference lookup matched an entry.
    #[must_use]
    pub const fn enrichment_applied(&self) -> u64 {
        self.enrichment_applied
    }

    /// Records that became Gold.
    #[must_use]
    pub const fn gold_records(&self) -> u64 {
        self.gold_records
    }

    /// Records folded into a window.
    #[must_use]
    pub const fn aggregated(&self) -> u64 {
        self.aggregated
    }

    /// Retries spent across all stages.
    #[must_use]
    pub const fn retries(&self) -> u64 {
        self.retries
    }

    /// Dead-letter descriptors in the order they occurred.
    #[must_use]
    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// Wall-clock duration of the run (or the delta's flush period).
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// True when terminal counts add up to the input count.
    #[must_use]
    pub const fn reconciles(&self) -> bool {
        self.success + self.dead_lettered == self.received
    }

    /// Replace the reported duration.
    #[must_use]
    pub const fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Fold another result into this one (streaming deltas, multi-type totals).
    ///
    /// The data type is kept only if both sides agree.
    pub fn merge(&mut self, other: Self) {
        if self.data_type != other.data_type {
            self.data_type = if self.received == 0 && self.data_type.is_none() {
                other.data_type
            } else {
                None
            };
        }
        self.received += other.received;
        self.success += other.success;
        self.dead_lettered += other.dead_lettered;
        self.normalization_errors += other.normalization_errors;
        self.enrichment_applied += other.enrichment_applied;
        self.gold_records += other.gold_records;
        self.aggregated += other.aggregated;
        self.retries += other.retries;
        self.errors.extend(other.errors);
        self.elapsed = self.elapsed.max(other.elapsed);
        self.status = if self.dead_lettered == 0 {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
    }
}

/// Mutable accounting used while a run is in flight.
#[derive(Debug, Clone, Default)]
pub struct RunTally {
    inner: PipelineRunResult,
}

impl RunTally {
    /// Start a tally for one data type tag (or `None` for mixed input).
    #[must_use]
    pub fn new(data_type: Option<String>) -> Self {
        Self {
            inner: PipelineRunResult {
                data_type,
                ..PipelineRunResult::default()
            },
        }
    }

    /// Count an input record.
    pub const fn received(&mut self) {
        self.inner.received += 1;
    }

    /// Count a record that became Gold.
    pub const fn gold(&mut self, reference_matched: bool) {
        self.inner.gold_records += 1;
        if reference_matched {
            self.inner.enrichment_applied += 1;
        }
    }

    /// Count a record folded into a window.
    pub const fn aggregated(&mut self) {
        self.inner.aggregated += 1;
    }

    /// Count retries spent on a record.
    pub const fn retried(&mut self, retries: u32) {
        self.inner.retries += retries as u64;
    }

    /// Terminal: record published.
    pub const fn published(&mut self) {
        self.inner.success += 1;
    }

    /// Terminal: record dead-lettered.
    pub fn dead_lettered(&mut self, record: ErrorRecord) {
        if record.stage == Stage::Normalize {
            self.inner.normalization_errors += 1;
        }
        self.inner.dead_lettered += 1;
        self.inner.errors.push(record);
    }

    /// Records received so far.
    #[must_use]
    pub const fn received_count(&self) -> u64 {
        self.inner.received
    }

    /// Terminal records so far.
    #[must_use]
    pub const fn terminal_count(&self) -> u64 {
        self.inner.success + self.inner.dead_lettered
    }

    /// Close the tally.
    #[must_use]
    pub fn finish(mut self, elapsed: Duration) -> PipelineRunResult {
        self.inner.elapsed = elapsed;
        self.inner.status = if self.inner.dead_lettered == 0 {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
        self.inner
    }

    /// Emit the current counts as a delta and reset for the next period.
    #[must_use]
    pub fn take_delta(&mut self, elapsed: Duration) -> PipelineRunResult {
        let data_type = self.inner.data_type.clone();
        std::mem::replace(self, Self::new(data_type)).finish(elapsed)
    }
}
