//! TTL cache in front of a reference source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use medallion_core::{ReferenceEntry, ReferenceKey, ReferenceSource};
use medallion_types::PipelineError;
use moka::future::Cache;

/// Caching settings for [`CachedReferenceSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceCacheConfig {
    /// How long a lookup outcome stays fresh.
    pub ttl: Duration,
    /// Maximum cached keys.
    pub max_entries: u64,
}

impl Default for ReferenceCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 10_000,
        }
    }
}

/// Reference source wrapper that memoizes lookups per key.
///
/// Both hits and misses (`None`) are cached. Errors are never cached, so a
/// transient outage is retried against the inner source. Concurrent lookups
/// of the same key share one inner call.
pub struct CachedReferenceSource {
    inner: Arc<dyn ReferenceSource>,
    cache: Cache<ReferenceKey, Option<ReferenceEntry>>,
}

impl CachedReferenceSource {
    /// Wrap `inner` with the given settings.
    #[must_use]
    pub fn new(inner: Arc<dyn ReferenceSource>, cfg: ReferenceCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(cfg.max_entries.max(1))
            .time_to_live(cfg.ttl)
            .build();
        Self { inner, cache }
    }

    /// Access the wrapped source.
    pub fn inner(&self) -> &Arc<dyn ReferenceSource> {
        &self.inner
    }

    /// Approximate number of cached keys.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Drop every cached outcome.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

impl std::fmt::Debug for CachedReferenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedReferenceSource")
            .field("inner", &self.inner.name())
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait]
impl ReferenceSource for CachedReferenceSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn lookup(&self, key: &ReferenceKey) -> Result<Option<ReferenceEntry>, PipelineError> {
        self.cache
            .try_get_with(key.clone(), self.inner.lookup(key))
            .await
            .map_err(|e| (*e).clone())
    }
}
