use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medallion_types::{DataType, PipelineError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lookup key for reference data: `(instrument_id, timestamp, region)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceKey {
    /// Instrument the record observes.
    pub instrument_id: String,
    /// Region carried by the record, if any.
    pub region: Option<String>,
    /// Business timestamp of the record.
    pub at: DateTime<Utc>,
    /// Data type of the record.
    pub data_type: DataType,
}

/// One row of reference data for an instrument.
///
/// `valid_from` is inclusive and `valid_to` exclusive; open bounds are `None`.
/// An entry with a `region` only matches records from that region.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReferenceEntry {
    /// Instrument the entry describes.
    pub instrument_id: String,
    /// Region restriction; `None` matches any region.
    pub region: Option<String>,
    /// Programs the instrument participates in.
    pub programs: BTreeSet<String>,
    /// Region code to attach.
    pub region_code: Option<String>,
    /// Applicable rate to attach.
    pub applicable_rate: Option<Decimal>,
    /// Owning market participant.
    pub participant_id: Option<String>,
    /// Start of validity (inclusive).
    pub valid_from: Option<DateTime<Utc>>,
    /// End of validity (exclusive).
    pub valid_to: Option<DateTime<Utc>>,
}

impl ReferenceEntry {
    /// Region-agnostic, always-valid entry.
    pub fn new(instrument_id: impl Into<String>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            ..Self::default()
        }
    }

    /// Add a program membership.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.programs.insert(program.into());
        self
    }

    /// Restrict the entry to one region.
    #[must_use]
    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the region code attached to matching records.
    #[must_use]
    pub fn with_region_code(mut self, code: impl Into<String>) -> Self {
        self.region_code = Some(code.into());
        self
    }

    /// Set the applicable rate.
    #[must_use]
    pub const fn with_rate(mut self, rate: Decimal) -> Self {
        self.applicable_rate = Some(rate);
        self
    }

    /// Set the owning participant.
    #[must_use]
    pub fn with_participant(mut self, participant: impl Into<String>) -> Self {
        self.participant_id = Some(participant.into());
        self
    }

    /// Bound the validity interval.
    #[must_use]
    pub const fn valid_between(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = from;
        self.valid_to = to;
        self
    }

    /// True if the entry is in force at `at`.
    #[must_use]
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from.is_none_or(|from| from <= at) && self.valid_to.is_none_or(|to| at < to)
    }
}

/// Source of reference data (eligibility tables, participant and region mappings).
///
/// `Ok(None)` means the record legitimately has no entry. Unreachable
/// sources must return a transient error (`LookupUnavailable` or `Timeout`).
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    /// Label used in errors and logs.
    fn name(&self) -> &str;

    /// Find the entry in force for `key`.
    async fn lookup(&self, key: &ReferenceKey) -> Result<Option<ReferenceEntry>, PipelineError>;
}

/// In-memory reference snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticReferenceTable {
    entries: HashMap<String, Vec<ReferenceEntry>>,
}

impl StaticReferenceTable {
    /// Empty table; every lookup is a miss.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    pub fn insert(&mut self, entry: ReferenceEntry) {
        self.entries
            .entry(entry.instrument_id.clone())
            .or_default()
            .push(entry);
    }

    /// Number of entries across all instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// True if the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pure lookup: region-specific entries win over region-agnostic ones;
    /// among equals, the latest `valid_from` wins.
    #[must_use]
    pub fn find(&self, key: &ReferenceKey) -> Option<&ReferenceEntry> {
        let candidates = self.entries.get(&key.instrument_id)?;
        let valid = candidates.iter().filter(|e| e.is_valid_at(key.at));
        let mut best: Option<&ReferenceEntry> = None;
        for entry in valid {
            let specific = match (&entry.region, &key.region) {
                (None, _) => false,
                (Some(r), Some(k)) if r.eq_ignore_ascii_case(k) => true,
                (Some(_), _) => continue,
            };
            best = match best {
                None => Some(entry),
                Some(cur) => {
                    let cur_specific = cur.region.is_some();
                    if (specific, entry.valid_from) > (cur_specific, cur.valid_from) {
                        Some(entry)
                    } else {
                        Some(cur)
                    }
                }
            };
        }
        best
    }
}

impl FromIterator<ReferenceEntry> for StaticReferenceTable {
    fn from_iter<I: IntoIterator<Item = ReferenceEntry>>(iter: I) -> Self {
        let mut table = Self::new();
        for entry in iter {
            table.insert(entry);
        }
        table
    }
}

#[async_trait]
impl ReferenceSource for StaticReferenceTable {
    fn name(&self) -> &str {
        "static-reference"
    }

    async fn lookup(&self, key: &ReferenceKey) -> Result<Option<ReferenceEntry>, PipelineError> {
        Ok(self.find(key).cloned())
    }
}
