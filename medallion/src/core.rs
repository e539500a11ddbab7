use std::sync::Arc;
use std::time::Duration;

use medallion_core::{
    Aggregator, BackoffConfig, BreakerConfig, BucketAlignment, DeadLetterSink,
    EligibilityPredicate, Enricher, GoldSink, IntervalSize, Normalizer, PipelineConfig,
    PipelineError, ProgramMembership, ReferenceSource, SchemaRegistry, StaticReferenceTable,
    StreamConfig, SummarySink,
};
use medallion_governor::{CachedReferenceSource, Governor, ReferenceCacheConfig};

/// Normalize, enrich, aggregate and publish market records.
///
/// Cloning is cheap; clones share aggregation windows and breaker state.
#[derive(Clone)]
pub struct Pipeline {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) cfg: PipelineConfig,
    pub(crate) normalizer: Normalizer,
    pub(crate) enricher: Enricher,
    pub(crate) aggregator: Aggregator,
    pub(crate) governor: Governor,
    pub(crate) summary: Arc<dyn SummarySink>,
    pub(crate) dead_letters: Arc<dyn DeadLetterSink>,
    pub(crate) gold: Option<Arc<dyn GoldSink>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("cfg", &self.inner.cfg)
            .field("summary", &self.inner.summary.name())
            .field("dead_letters", &self.inner.dead_letters.name())
            .field("gold", &self.inner.gold.as_ref().map(|g| g.name()))
            .finish_non_exhaustive()
    }
}

/// Builder for constructing a [`Pipeline`] with custom collaborators and configuration.
pub struct PipelineBuilder {
    reference: Option<Arc<dyn ReferenceSource>>,
    reference_cache: Option<ReferenceCacheConfig>,
    summary: Option<Arc<dyn SummarySink>>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    gold: Option<Arc<dyn GoldSink>>,
    registry: Option<Arc<dyn SchemaRegistry>>,
    predicate: Option<Arc<dyn EligibilityPredicate>>,
    cfg: PipelineConfig,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// Create a new builder with default configuration.
    ///
    /// Behavior and trade-offs:
    /// - Starts with no sinks; a summary sink and a dead-letter sink are required.
    /// - Without a reference source every record enriches with `NoMatch` defaults.
    /// - Defaults: 5-minute UTC buckets, Pacific market time, `EDAM` eligibility,
    ///   4 attempts with 100ms doubling backoff, 5s stage timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reference: None,
            reference_cache: None,
            summary: None,
            dead_letters: None,
            gold: None,
            registry: None,
            predicate: None,
            cfg: PipelineConfig::default(),
        }
    }

    /// Reference data consulted during enrichment.
    #[must_use]
    pub fn reference_source(mut self, source: Arc<dyn ReferenceSource>) -> Self {
        self.reference = Some(source);
        self
    }

    /// Memoize reference lookups in a TTL cache.
    ///
    /// Behavior and trade-offs:
    /// - Hits and misses are cached for `ttl`; errors are not.
    /// - Reference changes become visible only after the entry expires.
    #[must_use]
    pub const fn reference_cache(mut self, cfg: ReferenceCacheConfig) -> Self {
        self.reference_cache = Some(cfg);
        self
    }

    /// Aggregated output table.
    #[must_use]
    pub fn summary_sink(mut self, sink: Arc<dyn SummarySink>) -> Self {
        self.summary = Some(sink);
        self
    }

    /// Terminal storage for permanently failed records.
    #[must_use]
    pub fn dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Optional downstream for every Gold record.
    #[must_use]
    pub fn gold_sink(mut self, sink: Arc<dyn GoldSink>) -> Self {
        self.gold = Some(sink);
        self
    }

    /// Schema version resolution used by the normalizer.
    #[must_use]
    pub fn schema_registry(mut self, registry: Arc<dyn SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the program-membership eligibility rule.
    #[must_use]
    pub fn eligibility(mut self, predicate: Arc<dyn EligibilityPredicate>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, cfg: PipelineConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Aggregation bucket width.
    #[must_use]
    pub const fn interval(mut self, interval: IntervalSize) -> Self {
        self.cfg.interval = interval;
        self
    }

    /// Aggregation bucket anchoring.
    #[must_use]
    pub const fn alignment(mut self, alignment: BucketAlignment) -> Self {
        self.cfg.alignment = alignment;
        self
    }

    /// How far behind the latest bucket aggregation windows are kept.
    ///
    /// Behavior and trade-offs:
    /// - Runs evict older windows when they finish (batch) or flush (stream),
    ///   bounding memory on long-running streams.
    /// - A record for an evicted bucket is dead-lettered at `Aggregate`
    ///   instead of reopening the window; keep the horizon wider than the
    ///   latest data you expect to replay.
    /// - `None` keeps every window until `Aggregator::evict_before` is called.
    #[must_use]
    pub const fn window_retention(mut self, retention: Option<Duration>) -> Self {
        self.cfg.window_retention = retention;
        self
    }

    /// Market time zone used for on-peak classification.
    #[must_use]
    pub const fn market_tz(mut self, tz: chrono_tz::Tz) -> Self {
        self.cfg.market_tz = tz;
        self
    }

    /// Program whose membership makes a record eligible.
    ///
    /// Ignored when a custom predicate is set with [`Self::eligibility`].
    #[must_use]
    pub fn eligibility_program(mut self, program: impl Into<String>) -> Self {
        self.cfg.eligibility_program = program.into();
        self
    }

    /// Tenant assigned to records that do not carry one.
    #[must_use]
    pub fn default_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.cfg.default_tenant = tenant.into();
        self
    }

    /// Retry policy for transient stage failures.
    ///
    /// Behavior and trade-offs:
    /// - More attempts ride out longer outages but hold a record (and, in
    ///   streaming mode, its partition) for longer.
    /// - Higher jitter spreads retries of concurrent types apart.
    #[must_use]
    pub const fn backoff(mut self, cfg: BackoffConfig) -> Self {
        self.cfg.backoff = cfg;
        self
    }

    /// Circuit breaker policy applied per `(stage, data_type)`.
    #[must_use]
    pub const fn breaker(mut self, cfg: BreakerConfig) -> Self {
        self.cfg.breaker = cfg;
        self
    }

    /// Upper bound for any single governed stage call.
    #[must_use]
    pub const fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.stage_timeout = timeout;
        self
    }

    /// Data types processed concurrently by `run_batches`.
    #[must_use]
    pub const fn max_concurrent_types(mut self, n: usize) -> Self {
        self.cfg.max_concurrent_types = n;
        self
    }

    /// Streaming partitions, queue capacity and delta cadence.
    #[must_use]
    pub const fn stream(mut self, cfg: StreamConfig) -> Self {
        self.cfg.stream = cfg;
        self
    }

    /// Build the `Pipeline`.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration fails validation, or
    /// `InvalidArg` if the summary or dead-letter sink is missing.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        self.cfg.validate()?;

        let summary = self.summary.ok_or_else(|| {
            PipelineError::InvalidArg(
                "no summary sink registered; add one via summary_sink(...)".to_string(),
            )
        })?;
        let dead_letters = self.dead_letters.ok_or_else(|| {
            PipelineError::InvalidArg(
                "no dead-letter sink registered; add one via dead_letter_sink(...)".to_string(),
            )
        })?;

        let mut reference = self
            .reference
            .unwrap_or_else(|| Arc::new(StaticReferenceTable::new()));
        if let Some(cache) = self.reference_cache {
            reference = Arc::new(CachedReferenceSource::new(reference, cache));
        }
        let predicate = self.predicate.unwrap_or_else(|| {
            Arc::new(ProgramMembership::new(self.cfg.eligibility_program.clone()))
        });

        let normalizer = self
            .registry
            .map_or_else(Normalizer::default, Normalizer::new);
        let enricher = Enricher::new(reference)
            .with_predicate(predicate)
            .with_market_tz(self.cfg.market_tz);
        let aggregator = Aggregator::new(self.cfg.alignment);
        let governor = Governor::from_config(&self.cfg);

        Ok(Pipeline {
            inner: Arc::new(Inner {
                cfg: self.cfg,
                normalizer,
                enricher,
                aggregator,
                governor,
                summary,
                dead_letters,
                gold: self.gold,
            }),
        })
    }
}

impl Pipeline {
    /// Start building a new `Pipeline`.
    ///
    /// ```rust,ignore
    /// use std::sync::Arc;
    /// use medallion::{IntervalSize, Pipeline};
    ///
    /// let pipeline = Pipeline::builder()
    ///     .reference_source(Arc::new(reference_table))
    ///     .summary_sink(summary.clone())
    ///     .dead_letter_sink(dlq.clone())
    ///     .interval(IntervalSize::FIVE_MINUTES)
    ///     .build()?;
    ///
    /// let result = pipeline.run_batch(records, "lmp_dam").await;
    /// assert!(result.reconciles());
    /// ```
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Validated configuration in use.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.cfg
    }

    /// Window accumulators shared by every run of this pipeline.
    #[must_use]
    pub fn aggregator(&self) -> &Aggregator {
        &self.inner.aggregator
    }

    /// Retry and breaker state shared by every run of this pipeline.
    #[must_use]
    pub fn governor(&self) -> &Governor {
        &self.inner.governor
    }

    /// Evict windows that fell behind the configured retention horizon.
    pub(crate) fn enforce_retention(&self) {
        let Some(retention) = self.inner.cfg.window_retention else {
            return;
        };
        let evicted = self.inner.aggregator.evict_older_than(retention);
        #[cfg(feature = "tracing")]
        if evicted > 0 {
            tracing::debug!(
                evicted,
                remaining = self.inner.aggregator.len(),
                "evicted aggregation windows"
            );
        }
        #[cfg(not(feature = "tracing"))]
        let _ = evicted;
    }

    /// Wrap a stage future with the stage timeout.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "medallion::core::call_with_timeout",
            skip(fut),
            fields(
                label = label,
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            ),
        )
    )]
    pub(crate) async fn call_with_timeout<T, Fut>(
        label: &'static str,
        timeout: Duration,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: core::future::Future<Output = Result<T, PipelineError>>,
    {
        (tokio::time::timeout(timeout, fut).await)
            .unwrap_or_else(|_| Err(PipelineError::timeout(label)))
    }
}
