//! medallion-core
//!
//! Stage transforms and collaborator traits shared across the medallion
//! workspace.
//!
//! - `normalize`: Bronze -> Silver field coercion and validation.
//! - `enrich`: Silver -> Gold reference lookups and derived flags.
//! - `aggregate`: Gold -> OHLC windows with idempotent re-delivery.
//! - `ingest`: CSV snapshot tables -> Bronze records.
//! - `sink`: summary, Gold and dead-letter sink traits.
//!
//! Async runtime (Tokio)
//! ---------------------
//! `stream::CancelToken` is built on `tokio::sync::watch` and
//! `stream::RunHandle` wraps a `tokio::task::JoinHandle`, so code that runs
//! pipelines must run under a Tokio 1.x runtime.
#![warn(missing_docs)]

/// Incremental OHLC aggregation.
pub mod aggregate;
/// Reference lookups and enrichment.
pub mod enrich;
/// CSV snapshot ingestion contract.
pub mod ingest;
/// Per-type normalization.
pub mod normalize;
/// Outbound sink traits.
pub mod sink;
/// Cancellation tokens and run handles.
pub mod stream;

pub use aggregate::{Aggregator, WindowUpdate, bucket_start};
pub use enrich::{
    DEFAULT_PROGRAM, EligibilityPredicate, Enricher, ProgramMembership, ReferenceEntry,
    ReferenceKey, ReferenceSource, StaticReferenceTable, is_on_peak,
};
pub use ingest::{load_snapshot_dir, read_table, read_table_path};
pub use normalize::{Normalizer, SchemaRegistry, StaticSchemaRegistry};
pub use sink::{DeadLetterSink, GoldSink, SummarySink};
pub use stream::{CancelToken, RunHandle};

pub use medallion_types::*;
