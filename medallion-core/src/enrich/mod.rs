//! Silver -> Gold enrichment.
//!
//! The enricher is split into an async reference lookup and a pure
//! [`Enricher::apply`] step so that the lookup can be governed (retried,
//! timed out, short-circuited) independently of context derivation.

mod reference;

use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use medallion_types::{
    ContextValue, EnrichmentContext, GoldRecord, PipelineError, SilverPayload, SilverRecord,
    context_keys,
};

pub use reference::{ReferenceEntry, ReferenceKey, ReferenceSource, StaticReferenceTable};

/// Default program driving the eligibility flag.
pub const DEFAULT_PROGRAM: &str = "EDAM";

/// Decides whether a record with a matching reference entry is program-eligible.
pub trait EligibilityPredicate: Send + Sync {
    /// Evaluate eligibility. Only called when a reference entry matched.
    fn is_eligible(&self, record: &SilverRecord, entry: &ReferenceEntry) -> bool;
}

/// Eligible iff the reference entry lists a given program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramMembership {
    program: String,
}

impl ProgramMembership {
    /// Membership test for `program` (case-insensitive).
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ProgramMembership {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl EligibilityPredicate for ProgramMembership {
    fn is_eligible(&self, _record: &SilverRecord, entry: &ReferenceEntry) -> bool {
        entry
            .programs
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&self.program))
    }
}

/// Silver -> Gold transform.
#[derive(Clone)]
pub struct Enricher {
    source: Arc<dyn ReferenceSource>,
    predicate: Arc<dyn EligibilityPredicate>,
    market_tz: chrono_tz::Tz,
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("source", &self.source.name())
            .field("market_tz", &self.market_tz)
            .finish_non_exhaustive()
    }
}

impl Enricher {
    /// Enricher with the default `EDAM` membership predicate and Pacific market time.
    #[must_use]
    pub fn new(source: Arc<dyn ReferenceSource>) -> Self {
        Self {
            source,
            predicate: Arc::new(ProgramMembership::default()),
            market_tz: chrono_tz::America::Los_Angeles,
        }
    }

    /// Replace the eligibility predicate.
    #[must_use]
    pub fn with_predicate(mut self, predicate: Arc<dyn EligibilityPredicate>) -> Self {
        self.predicate = predicate;
        self
    }

    /// Time zone used for on-peak classification.
    #[must_use]
    pub const fn with_market_tz(mut self, tz: chrono_tz::Tz) -> Self {
        self.market_tz = tz;
        self
    }

    /// The reference source this enricher consults.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn ReferenceSource> {
        &self.source
    }

    /// Reference key for a record.
    #[must_use]
    pub fn reference_key(record: &SilverRecord) -> ReferenceKey {
        ReferenceKey {
            instrument_id: record.payload().instrument_id(),
            region: record.payload().region().map(str::to_string),
            at: record.observed_at(),
            data_type: record.data_type(),
        }
    }

    /// Look up reference data and derive the context.
    ///
    /// # Errors
    /// Propagates the source's transient errors. A missing entry is not an error.
    pub async fn enrich(&self, record: SilverRecord) -> Result<GoldRecord, PipelineError> {
        let entry = self.source.lookup(&Self::reference_key(&record)).await?;
        Ok(self.apply(record, entry.as_ref(), Utc::now()))
    }

    /// Derive the enrichment context given the lookup outcome. Pure.
    #[must_use]
    pub fn apply(
        &self,
        record: SilverRecord,
        entry: Option<&ReferenceEntry>,
        enriched_at: DateTime<Utc>,
    ) -> GoldRecord {
        let mut ctx = EnrichmentContext::new(entry.is_some(), enriched_at);

        let eligible = entry.map_or(ContextValue::NoMatch, |e| {
            ContextValue::Bool(self.predicate.is_eligible(&record, e))
        });
        ctx = ctx.with(context_keys::PROGRAM_ELIGIBLE, eligible);

        let region = entry
            .and_then(|e| e.region_code.clone())
            .or_else(|| record.payload().region().map(str::to_string))
            .map_or(ContextValue::NoMatch, ContextValue::Text);
        ctx = ctx.with(context_keys::REGION_CODE, region);

        let rate = entry
            .and_then(|e| e.applicable_rate)
            .map_or(ContextValue::NoMatch, ContextValue::Number);
        ctx = ctx.with(context_keys::APPLICABLE_RATE, rate);

        let participant = entry
            .and_then(|e| e.participant_id.clone())
            .map_or(ContextValue::NoMatch, ContextValue::Text);
        ctx = ctx.with(context_keys::PARTICIPANT_ID, participant);

        if let Some(price) = record.payload().price() {
            ctx = ctx.with(
                context_keys::NEGATIVE_PRICE,
                ContextValue::Bool(price.is_sign_negative() && !price.is_zero()),
            );
        }

        if !matches!(
            record.payload(),
            SilverPayload::Rec(_) | SilverPayload::Emission(_)
        ) {
            ctx = ctx.with(
                context_keys::ON_PEAK,
                ContextValue::Bool(is_on_peak(record.observed_at(), self.market_tz)),
            );
        }

        if let SilverPayload::Lmp(p) = record.payload()
            && let Some(share) = p.lmp_congestion.checked_div(p.lmp_total)
        {
            ctx = ctx.with(
                context_keys::CONGESTION_SHARE,
                ContextValue::Number(share.round_dp(6)),
            );
        }

        GoldRecord::new(record, ctx)
    }
}

/// On-peak block: hour-ending 7 through 22, Monday through Saturday, local time.
#[must_use]
pub fn is_on_peak(at: DateTime<Utc>, tz: chrono_tz::Tz) -> bool {
    let local = at.with_timezone(&tz);
    let hour_ending = local.hour() + 1;
    local.weekday() != Weekday::Sun && (7..=22).contains(&hour_ending)
}
