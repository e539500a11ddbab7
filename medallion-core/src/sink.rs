//! Outbound collaborators: summary store, Gold record topic and dead-letter path.
//!
//! Implementations report unreachable backends with `SinkUnavailable` (or
//! `Timeout`) so the governor can retry them.

use async_trait::async_trait;
use medallion_types::{ErrorRecord, GoldRecord, PipelineError, SummaryRow};

/// Aggregated output table keyed by `(tenant_id, instrument_id, interval_start)`.
///
/// Writes for one key may arrive out of order; the row with the newest
/// `created_at` wins.
#[async_trait]
pub trait SummarySink: Send + Sync {
    /// Label used in errors and logs.
    fn name(&self) -> &str;

    /// Replace the stored row sharing each row's conflict key unless the
    /// stored one is at least as new.
    async fn upsert(&self, rows: &[SummaryRow]) -> Result<(), PipelineError>;
}

/// Optional downstream for enriched records.
#[async_trait]
pub trait GoldSink: Send + Sync {
    /// Label used in errors and logs.
    fn name(&self) -> &str;

    /// Publish one Gold record.
    async fn publish(&self, record: &GoldRecord) -> Result<(), PipelineError>;
}

/// Terminal storage for records that permanently failed.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Label used in errors and logs.
    fn name(&self) -> &str;

    /// Persist one dead letter.
    async fn write(&self, record: &ErrorRecord) -> Result<(), PipelineError>;
}
