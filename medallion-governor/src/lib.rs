//! medallion-governor
//!
//! Failure policy for pipeline stage transitions:
//! - `BackoffPolicy`: capped exponential delays with bounded jitter.
//! - `CircuitBreaker` / `BreakerRegistry`: rolling failure-rate breakers per
//!   `(stage, data_type)`.
//! - `Governor`: per-attempt timeout, retry of transient errors, escalation to
//!   `RetriesExhausted`, fail-fast on open breakers, cancellation-aware waits.
//! - `CachedReferenceSource`: TTL cache in front of a reference source.

mod backoff;
mod breaker;
mod cache;
mod governor;

pub use crate::backoff::{BackoffPolicy, jitter_wait};
pub use crate::breaker::{BreakerRegistry, BreakerState, CircuitBreaker};
pub use crate::cache::{CachedReferenceSource, ReferenceCacheConfig};
pub use crate::governor::{Governed, Governor};
