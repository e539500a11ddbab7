use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the medallion workspace.
///
/// Variants are split into permanent failures (never retried) and transient
/// failures (retried by the governor until the attempt budget is spent).
/// See [`PipelineError::is_transient`].
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PipelineError {
    /// The record's `data_type` tag has no declared schema.
    #[error("unsupported data type: {data_type}")]
    UnsupportedType {
        /// The raw tag carried by the offending record.
        data_type: String,
    },

    /// A field failed presence, coercion or range validation.
    #[error("validation failed on `{field}`: {reason}")]
    Validation {
        /// Name of the offending field.
        field: String,
        /// Human-readable description of the failure.
        reason: String,
    },

    /// The reference-data dependency could not be reached.
    #[error("reference lookup unavailable via {provider}: {msg}")]
    LookupUnavailable {
        /// Name of the reference source that failed.
        provider: String,
        /// Human-readable error message.
        msg: String,
    },

    /// A window key collided with incompatible accumulator state.
    #[error("aggregation conflict on {key}: {msg}")]
    AggregationConflict {
        /// Rendered window key.
        key: String,
        /// Description of the incompatibility.
        msg: String,
    },

    /// The downstream sink rejected or could not accept a write.
    #[error("sink {sink} unavailable: {msg}")]
    SinkUnavailable {
        /// Sink name.
        sink: String,
        /// Human-readable error message.
        msg: String,
    },

    /// A governed call exceeded its per-stage timeout.
    #[error("stage timed out: {stage}")]
    Timeout {
        /// Stage label (e.g. "enrich", "publish").
        stage: String,
    },

    /// The circuit breaker for `(stage, data_type)` is open.
    #[error("circuit open for {stage}/{data_type}: reset_in_ms={reset_in_ms}")]
    CircuitOpen {
        /// Stage label.
        stage: String,
        /// Data type tag.
        data_type: String,
        /// Milliseconds until the breaker cooldown elapses.
        reset_in_ms: u64,
    },

    /// A transient failure persisted past the configured attempt budget.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The final transient error observed.
        last: Box<PipelineError>,
    },

    /// The run was cancelled before the record reached a terminal state.
    #[error("cancelled")]
    Cancelled,

    /// An ingestion file is missing required columns.
    #[error("table {table} is missing required columns: {missing:?}")]
    Structural {
        /// Logical table name (e.g. "load_demand").
        table: String,
        /// Columns that were required but absent from the header.
        missing: Vec<String>,
    },

    /// Reading an ingestion file failed.
    #[error("ingest failed for {path}: {msg}")]
    Ingest {
        /// Path or label of the input being read.
        path: String,
        /// Human-readable error message.
        msg: String,
    },

    /// Pipeline configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid input argument.
    #[error("invalid argument: {0}")]
    InvalidArg(String),
}

impl PipelineError {
    /// Helper: build an `UnsupportedType` error for a raw tag.
    pub fn unsupported_type(data_type: impl Into<String>) -> Self {
        Self::UnsupportedType {
            data_type: data_type.into(),
        }
    }

    /// Helper: build a `Validation` error naming the offending field.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Helper: build a `LookupUnavailable` error.
    pub fn lookup_unavailable(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::LookupUnavailable {
            provider: provider.into(),
            msg: msg.into(),
        }
    }

    /// Helper: build an `AggregationConflict` error.
    pub fn aggregation_conflict(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::AggregationConflict {
            key: key.into(),
            msg: msg.into(),
        }
    }

    /// Helper: build a `SinkUnavailable` error.
    pub fn sink_unavailable(sink: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SinkUnavailable {
            sink: sink.into(),
            msg: msg.into(),
        }
    }

    /// Helper: build a `Timeout` error for a stage label.
    pub fn timeout(stage: impl Into<String>) -> Self {
        Self::Timeout {
            stage: stage.into(),
        }
    }

    /// Returns true if the failure is worth retrying.
    ///
    /// Only external-dependency failures are transient. Everything else
    /// describes the record itself (or a bug upstream) and retrying cannot help.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LookupUnavailable { .. } | Self::SinkUnavailable { .. } | Self::Timeout { .. }
        )
    }

    /// Classify this error for dead-letter descriptors.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::LookupUnavailable { .. } => ErrorKind::LookupUnavailable,
            Self::AggregationConflict { .. } => ErrorKind::AggregationConflict,
            Self::SinkUnavailable { .. } => ErrorKind::SinkUnavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Structural { .. } | Self::Ingest { .. } => ErrorKind::Ingest,
            Self::InvalidConfig(_) | Self::InvalidArg(_) => ErrorKind::Other,
        }
    }

    /// Name of the offending field for validation failures.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            Self::RetriesExhausted { last, .. } => last.field(),
            _ => None,
        }
    }
}

/// Coarse error classification carried by dead-letter records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// Unknown `data_type`.
    UnsupportedType,
    /// Field-level validation failure.
    Validation,
    /// Reference data unavailable.
    LookupUnavailable,
    /// Incompatible window state.
    AggregationConflict,
    /// Sink unavailable.
    SinkUnavailable,
    /// Stage timeout.
    Timeout,
    /// Fail-fast by an open circuit breaker.
    CircuitOpen,
    /// Transient failure escalated after the attempt budget.
    RetriesExhausted,
    /// Run cancellation.
    Cancelled,
    /// Ingestion file failure.
    Ingest,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// Stable snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedType => "unsupported_type",
            Self::Validation => "validation",
            Self::LookupUnavailable => "lookup_unavailable",
            Self::AggregationConflict => "aggregation_conflict",
            Self::SinkUnavailable => "sink_unavailable",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Cancelled => "cancelled",
            Self::Ingest => "ingest",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
