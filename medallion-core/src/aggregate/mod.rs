//! Gold -> windowed OHLC summaries.
//!
//! Windows live behind their own mutex; the key map is only locked long
//! enough to find or insert a slot, so updates to different buckets never
//! contend. Each window remembers the identities it has folded in, which
//! makes re-delivery idempotent.
//!
//! Each `(tenant_id, instrument_id)` series tracks the latest bucket it has
//! folded. Windows more than a retention horizon behind their series
//! watermark can be evicted, after which records for evicted buckets are
//! rejected instead of reopening them.

mod bucket;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use medallion_types::{
    AggregationWindow, BucketAlignment, GoldRecord, IntervalSize, PipelineError, RecordId,
    SummaryRow, WindowKey,
};
use serde_json::json;

pub use bucket::bucket_start;

/// Outcome of folding one Gold record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUpdate {
    /// Window state after the fold.
    pub window: AggregationWindow,
    /// Row to upsert into the summary sink.
    pub row: SummaryRow,
    /// False when the record had already been folded into this window.
    pub applied: bool,
}

#[derive(Debug)]
struct WindowState {
    window: AggregationWindow,
    seen: HashSet<RecordId>,
    last_written: DateTime<Utc>,
    last_record: RecordId,
    source: String,
}

impl WindowState {
    /// Next `created_at`, strictly after the previous one for this window.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = if now > self.last_written {
            now
        } else {
            self.last_written + chrono::Duration::microseconds(1)
        };
        self.last_written = next;
        next
    }

    fn row(&mut self) -> SummaryRow {
        let created_at = self.stamp();
        let metadata = json!({
            "data_type": self.window.data_type().as_str(),
            "source": self.source,
            "last_record": self.last_record.as_str(),
        });
        self.window.to_row(metadata, created_at)
    }
}

type Slot = Arc<Mutex<Option<WindowState>>>;

#[derive(Debug, Default, Clone, Copy)]
struct Horizon {
    latest: Option<DateTime<Utc>>,
    evicted_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Horizons {
    /// Cutoff of manual `evict_before` calls; applies to every series.
    global: Option<DateTime<Utc>>,
    series: HashMap<(String, String), Horizon>,
}

impl Horizons {
    fn get(&self, tenant_id: &str, instrument_id: &str) -> Horizon {
        self.series
            .get(&(tenant_id.to_string(), instrument_id.to_string()))
            .copied()
            .unwrap_or_default()
    }

    fn closed_before(&self, key: &WindowKey) -> Option<DateTime<Utc>> {
        let own = self.get(&key.tenant_id, &key.instrument_id).evicted_before;
        own.max(self.global)
    }
}

fn later(current: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(current.map_or(candidate, |c| c.max(candidate)))
}

/// Incremental, idempotent OHLC aggregator.
#[derive(Debug, Default)]
pub struct Aggregator {
    alignment: BucketAlignment,
    windows: RwLock<HashMap<WindowKey, Slot>>,
    horizons: RwLock<Horizons>,
}

impl Aggregator {
    /// Aggregator anchoring buckets with `alignment`.
    #[must_use]
    pub fn new(alignment: BucketAlignment) -> Self {
        Self {
            alignment,
            windows: RwLock::new(HashMap::new()),
            horizons: RwLock::new(Horizons::default()),
        }
    }

    /// Bucket anchoring in use.
    #[must_use]
    pub const fn alignment(&self) -> BucketAlignment {
        self.alignment
    }

    /// Window key a record falls into, or `None` if it is not aggregated.
    ///
    /// # Errors
    /// Returns `Validation` on `timestamp` if the bucket start is unrepresentable.
    pub fn key_for(
        &self,
        record: &GoldRecord,
        interval: IntervalSize,
    ) -> Result<Option<WindowKey>, PipelineError> {
        let Some(obs) = record.silver().payload().observation() else {
            return Ok(None);
        };
        let interval_start = bucket_start(record.silver().observed_at(), interval, self.alignment)
            .ok_or_else(|| PipelineError::validation("timestamp", "bucket start out of range"))?;
        Ok(Some(WindowKey {
            tenant_id: record.silver().tenant_id().to_string(),
            instrument_id: obs.instrument_id,
            interval_start,
            interval_size: interval,
        }))
    }

    /// Fold a Gold record into its bucket.
    ///
    /// Returns `Ok(None)` for records without an observation. Re-delivery of
    /// an identity already folded into the bucket leaves the accumulators
    /// untouched and reports `applied: false`.
    ///
    /// # Errors
    /// `AggregationConflict` when the bucket was opened by another data type,
    /// `Validation` on `timestamp` when the bucket has already been evicted.
    pub fn aggregate(
        &self,
        record: &GoldRecord,
        interval: IntervalSize,
    ) -> Result<Option<WindowUpdate>, PipelineError> {
        let Some(key) = self.key_for(record, interval)? else {
            return Ok(None);
        };
        let bucket = key.interval_start;
        let closed = self
            .horizons
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .closed_before(&key);
        if let Some(horizon) = closed
            && bucket < horizon
        {
            return Err(PipelineError::validation(
                "timestamp",
                format!("bucket {bucket} of {key} was evicted (horizon {horizon})"),
            ));
        }
        let series = (key.tenant_id.clone(), key.instrument_id.clone());
        let Some(obs) = record.silver().payload().observation() else {
            return Ok(None);
        };
        let slot = self.slot(&key);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let lineage = record.lineage().clone();
        let at = Utc::now();

        let applied = match guard.as_mut() {
            None => {
                *guard = Some(WindowState {
                    window: AggregationWindow::open_with(
                        key,
                        record.data_type(),
                        obs.value,
                        obs.volume,
                        at,
                    ),
                    seen: HashSet::from([lineage.clone()]),
                    last_written: DateTime::<Utc>::MIN_UTC,
                    last_record: lineage,
                    source: record.silver().source().to_string(),
                });
                true
            }
            Some(state) => {
                if state.window.data_type() != record.data_type() {
                    return Err(PipelineError::aggregation_conflict(
                        state.window.key().to_string(),
                        format!(
                            "window opened by {} cannot accept {}",
                            state.window.data_type(),
                            record.data_type()
                        ),
                    ));
                }
                if state.seen.contains(&lineage) {
                    false
                } else {
                    state.window.apply(obs.value, obs.volume, at);
                    state.seen.insert(lineage.clone());
                    state.last_record = lineage;
                    state.source = record.silver().source().to_string();
                    true
                }
            }
        };

        let Some(state) = guard.as_mut() else {
            return Ok(None);
        };
        let row = state.row();
        let update = WindowUpdate {
            window: state.window.clone(),
            row,
            applied,
        };
        drop(guard);
        let mut horizons = self.horizons.write().unwrap_or_else(PoisonError::into_inner);
        let horizon = horizons.series.entry(series).or_default();
        horizon.latest = later(horizon.latest, bucket);
        Ok(Some(update))
    }

    /// Start of the latest bucket folded for a series.
    #[must_use]
    pub fn watermark(&self, tenant_id: &str, instrument_id: &str) -> Option<DateTime<Utc>> {
        self.horizons
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant_id, instrument_id)
            .latest
    }

    /// Buckets of a series starting before this instant have been evicted and are closed.
    #[must_use]
    pub fn evicted_before(&self, tenant_id: &str, instrument_id: &str) -> Option<DateTime<Utc>> {
        let horizons = self.horizons.read().unwrap_or_else(PoisonError::into_inner);
        let own = horizons.get(tenant_id, instrument_id).evicted_before;
        own.max(horizons.global)
    }

    fn slot(&self, key: &WindowKey) -> Slot {
        if let Some(slot) = self
            .windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(slot);
        }
        let mut map = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(key.clone()).or_default())
    }

    /// Current state of one window.
    #[must_use]
    pub fn window(&self, key: &WindowKey) -> Option<AggregationWindow> {
        let slot = self
            .windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()?;
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|s| s.window.clone())
    }

    /// All open windows, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AggregationWindow> {
        let slots: Vec<Slot> = self
            .windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut out: Vec<AggregationWindow> = slots
            .iter()
            .filter_map(|slot| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                    .map(|s| s.window.clone())
            })
            .collect();
        out.sort_by(|a, b| a.key().cmp(b.key()));
        out
    }

    /// Drop windows whose bucket started before `cutoff`. Returns how many were removed.
    ///
    /// Later records for those buckets are rejected rather than folded into a
    /// fresh window that would overwrite the published row.
    pub fn evict_before(&self, cutoff: DateTime<Utc>) -> usize {
        let removed = {
            let mut map = self.windows.write().unwrap_or_else(PoisonError::into_inner);
            let before = map.len();
            map.retain(|key, _| key.interval_start >= cutoff);
            before - map.len()
        };
        let mut horizons = self.horizons.write().unwrap_or_else(PoisonError::into_inner);
        horizons.global = later(horizons.global, cutoff);
        removed
    }

    /// Evict windows more than `retention` behind their series watermark.
    /// Returns how many were removed.
    pub fn evict_older_than(&self, retention: Duration) -> usize {
        let Ok(retention) = TimeDelta::from_std(retention) else {
            return 0;
        };
        let cutoffs: HashMap<(String, String), DateTime<Utc>> = {
            let mut horizons = self.horizons.write().unwrap_or_else(PoisonError::into_inner);
            horizons
                .series
                .iter_mut()
                .filter_map(|(series, horizon)| {
                    let cutoff = horizon.latest?.checked_sub_signed(retention)?;
                    horizon.evicted_before = later(horizon.evicted_before, cutoff);
                    Some((series.clone(), cutoff))
                })
                .collect()
        };
        let mut map = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|key, _| {
            cutoffs
                .get(&(key.tenant_id.clone(), key.instrument_id.clone()))
                .is_none_or(|cutoff| key.interval_start >= *cutoff)
        });
        before - map.len()
    }

    /// Number of tracked windows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when no window is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
