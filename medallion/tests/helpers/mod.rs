// Shared harness so tests can `use helpers::*;`
#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use medallion::{BackoffConfig, BreakerConfig, Pipeline, PipelineBuilder};
use medallion_mock::fixtures;
use medallion_mock::{
    DynamicMockController, DynamicReferenceSource, InMemoryDeadLetterSink, InMemoryGoldSink,
    InMemorySummarySink,
};
use rust_decimal::Decimal;

/// Pipeline wired to in-memory collaborators, with handles to inspect them.
pub struct Harness {
    pub pipeline: Pipeline,
    pub summary: Arc<InMemorySummarySink>,
    pub dlq: Arc<InMemoryDeadLetterSink>,
    pub gold: Arc<InMemoryGoldSink>,
    pub reference: DynamicMockController,
}

/// Deterministic backoff: 100ms doubling, no jitter, 4 attempts.
pub const fn fixed_backoff() -> BackoffConfig {
    BackoffConfig {
        base_delay_ms: 100,
        max_delay_ms: 1_000,
        factor: 2,
        jitter_percent: 0,
        max_attempts: 4,
    }
}

/// A breaker that never trips within a test.
pub const fn lenient_breaker() -> BreakerConfig {
    BreakerConfig {
        failure_rate_threshold: 0.99,
        window: Duration::from_secs(60),
        min_calls: 10_000,
        cooldown: Duration::from_secs(30),
    }
}

pub fn harness() -> Harness {
    harness_with(|b| b)
}

/// Harness that also publishes Gold records to `gold`.
pub fn harness_with_gold() -> Harness {
    wire(|b| b, true)
}

/// Build a harness, letting the caller adjust the builder before `build()`.
pub fn harness_with(adjust: impl FnOnce(PipelineBuilder) -> PipelineBuilder) -> Harness {
    wire(adjust, false)
}

fn wire(adjust: impl FnOnce(PipelineBuilder) -> PipelineBuilder, with_gold: bool) -> Harness {
    let summary = Arc::new(InMemorySummarySink::new());
    let dlq = Arc::new(InMemoryDeadLetterSink::new());
    let gold = Arc::new(InMemoryGoldSink::new());
    let (source, reference) =
        DynamicReferenceSource::new_with_controller("ref", fixtures::reference_table());
    let builder = Pipeline::builder()
        .reference_source(source)
        .summary_sink(summary.clone())
        .dead_letter_sink(dlq.clone())
        .backoff(fixed_backoff())
        .breaker(lenient_breaker());
    let builder = if with_gold {
        builder.gold_sink(gold.clone())
    } else {
        builder
    };
    let pipeline = adjust(builder).build().unwrap();
    Harness {
        pipeline,
        summary,
        dlq,
        gold,
        reference,
    }
}

/// Route pipeline logs to the test writer; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Parse a decimal literal without unwrap noise in tests.
pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}
