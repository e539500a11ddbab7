//! Medallion moves market records through Bronze, Silver and Gold tiers into
//! windowed OHLC summaries.
//!
//! Overview
//! - `Normalize`: coerce a raw Bronze record into a typed Silver record.
//! - `Enrich`: attach reference-data context (eligibility, region, rate,
//!   participant, on-peak and price flags) to produce a Gold record.
//! - `Aggregate`: fold Gold observations into per-bucket OHLC windows.
//! - `Publish`: upsert the window row into the summary sink and, optionally,
//!   hand the Gold record to a gold sink.
//!
//! Key behaviors and trade-offs
//! - Every received record ends `PUBLISHED` or `DEAD_LETTERED`; run results
//!   always reconcile (`success + dead_lettered == received`).
//! - Reference lookups and sink writes are governed: transient failures retry
//!   with capped, jittered exponential backoff, then escalate to
//!   `RetriesExhausted`. Permanent failures dead-letter at once.
//! - A circuit breaker per `(stage, data_type)` fails records fast while a
//!   dependency is degraded, then closes after its cooldown.
//! - Batch runs process one data type sequentially and several types
//!   concurrently. Streaming runs preserve order within a partition.
//! - Re-delivered records do not change window accumulators.
//!
//! Examples
//! Running a batch:
//! ```rust,ignore
//! use std::sync::Arc;
//! use medallion::Pipeline;
//!
//! let pipeline = Pipeline::builder()
//!     .reference_source(reference.clone())
//!     .summary_sink(summary.clone())
//!     .dead_letter_sink(dlq.clone())
//!     .build()?;
//!
//! let result = pipeline.run_batch(records, "lmp_dam").await;
//! println!("{} published, {} dead-lettered", result.success(), result.dead_lettered());
//! ```
//!
//! Streaming with deltas:
//! ```rust,ignore
//! let (ingress, mut deltas, handle) = pipeline.run_stream();
//! ingress.send(record).await?;
//! drop(ingress);
//! while let Some(delta) = deltas.recv().await {
//!     // ... report delta ...
//! }
//! let total = handle.join().await?;
//! ```
#![warn(missing_docs)]

mod batch;
pub(crate) mod core;
mod process;
mod stream;

pub use crate::core::{Pipeline, PipelineBuilder};
pub use crate::stream::{IngressError, StreamIngress};

pub use medallion_governor::{
    BackoffPolicy, BreakerState, CachedReferenceSource, Governed, Governor, ReferenceCacheConfig,
};

// Re-export core types for convenience
pub use medallion_core::{
    // Configuration
    BackoffConfig,
    BreakerConfig,
    BucketAlignment,
    IntervalSize,
    PipelineConfig,
    StreamConfig,
    // Records
    BronzeRecord,
    DataType,
    GoldRecord,
    RecordId,
    SilverRecord,
    SummaryRow,
    // Reports and errors
    ErrorKind,
    ErrorRecord,
    PipelineError,
    PipelineRunResult,
    RunStatus,
    Stage,
    // Collaborators
    DeadLetterSink,
    EligibilityPredicate,
    GoldSink,
    ReferenceEntry,
    ReferenceKey,
    ReferenceSource,
    SchemaRegistry,
    StaticReferenceTable,
    SummarySink,
    // Runs
    CancelToken,
    RunHandle,
};
