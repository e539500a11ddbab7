//! medallion-mock
//!
//! Deterministic Bronze fixtures and scriptable in-memory collaborators
//! (reference source, summary / Gold / dead-letter sinks) for tests.

mod dynamic;
pub mod fixtures;
mod sinks;

pub use dynamic::{DynamicMockController, DynamicReferenceSource, MockBehavior};
pub use sinks::{InMemoryDeadLetterSink, InMemoryGoldSink, InMemorySummarySink};
