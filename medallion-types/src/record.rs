//! Bronze, Silver and Gold record tiers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data_type::{DataType, SchemaVersion};

/// Tenant used when a record does not name one.
pub const DEFAULT_TENANT: &str = "default";

/// Stable identity of a Bronze record, carried forward for lineage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Raw feed record as received from a transport or loader.
///
/// The payload is an opaque JSON object; the `data_type` tag is kept as the
/// raw string so that unknown tags remain representable until normalization
/// rejects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BronzeRecord {
    data_type: String,
    source: String,
    tenant_id: String,
    received_at: DateTime<Utc>,
    schema_version: Option<SchemaVersion>,
    partition: Option<String>,
    id: Option<RecordId>,
    fields: Map<String, Value>,
}

impl BronzeRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        data_type: impl Into<String>,
        source: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            data_type: data_type.into(),
            source: source.into(),
            tenant_id: DEFAULT_TENANT.to_string(),
            received_at: Utc::now(),
            schema_version: None,
            partition: None,
            id: None,
            fields,
        }
    }

    /// Build a record from a JSON value; non-object values yield an empty payload.
    pub fn from_json(data_type: impl Into<String>, source: impl Into<String>, json: Value) -> Self {
        let fields = match json {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(data_type, source, fields)
    }

    /// Override the ingestion timestamp.
    #[must_use]
    pub fn with_received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }

    /// Assign the owning tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    /// Declare the wire schema version.
    #[must_use]
    pub const fn with_schema_version(mut self, version: SchemaVersion) -> Self {
        self.schema_version = Some(version);
        self
    }

    /// Pin the record to an explicit source partition.
    #[must_use]
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    /// Use an upstream-assigned identity instead of the payload digest.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(RecordId::new(id));
        self
    }

    /// Raw data type tag.
    #[must_use]
    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    /// Source label.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Owning tenant.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Ingestion timestamp.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Declared schema version, if any.
    #[must_use]
    pub const fn schema_version(&self) -> Option<SchemaVersion> {
        self.schema_version
    }

    /// Look up a payload field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Borrow the whole payload.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Logical partition used by streaming workers.
    ///
    /// Defaults to `<data_type>/<source>` so that records of one feed stay
    /// ordered relative to each other.
    #[must_use]
    pub fn partition_key(&self) -> String {
        self.partition
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.data_type, self.source))
    }

    /// Stable identity for lineage and de-duplication.
    ///
    /// An upstream id wins; otherwise a BLAKE3 digest over the tag, source,
    /// tenant and canonical payload. The ingestion timestamp is excluded so a
    /// re-delivered payload keeps its identity.
    #[must_use]
    pub fn identity(&self) -> RecordId {
        if let Some(id) = &self.id {
            return id.clone();
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.data_type.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.source.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.tenant_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(&serde_json::to_vec(&self.fields).unwrap_or_default());
        let hex = hasher.finalize().to_hex();
        RecordId(hex.as_str()[..32].to_string())
    }
}

macro_rules! declared_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $tag:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $tag)] $variant),+
        }

        impl $name {
            /// Declared wire values, in declaration order.
            pub const DECLARED: &'static [&'static str] = &[$($tag),+];

            /// Canonical wire value.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $tag),+
                }
            }

            /// Case-insensitive match against the declared set.
            #[must_use]
            pub fn parse_declared(raw: &str) -> Option<Self> {
                let raw = raw.trim();
                $(if raw.eq_ignore_ascii_case($tag) {
                    return Some(Self::$variant);
                })+
                None
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

declared_enum! {
    /// Market run that produced a price.
    MarketRun {
        /// Integrated forward market (day-ahead).
        Dam => "DAM",
        /// Real-time dispatch.
        Rtm => "RTM",
        /// Real-time pre-dispatch.
        Rtpd => "RTPD",
        /// Hour-ahead scheduling process.
        Hasp => "HASP",
    }
}

declared_enum! {
    /// Ancillary service product.
    AsProduct {
        /// Regulation up.
        RegUp => "RU",
        /// Regulation down.
        RegDown => "RD",
        /// Spinning reserve.
        Spin => "SR",
        /// Non-spinning reserve.
        NonSpin => "NR",
        /// Regulation mileage up.
        MileageUp => "RMU",
        /// Regulation mileage down.
        MileageDown => "RMD",
    }
}

declared_enum! {
    /// CRR time-of-use class.
    TimeOfUse {
        /// On-peak.
        On => "ON",
        /// Off-peak.
        Off => "OFF",
    }
}

declared_enum! {
    /// CRR hedge type.
    HedgeType {
        /// Obligation.
        Obligation => "OBL",
        /// Option.
        Opt => "OPT",
    }
}

declared_enum! {
    /// REC ledger lifecycle status.
    CertificateStatus {
        /// Issued and held.
        Active => "active",
        /// Retired against a compliance obligation.
        Retired => "retired",
        /// Moved to another account.
        Transferred => "transferred",
        /// Awaiting issuance.
        Pending => "pending",
    }
}

declared_enum! {
    /// GHG protocol scope.
    EmissionScope {
        /// Direct emissions.
        Scope1 => "scope1",
        /// Purchased energy.
        Scope2 => "scope2",
        /// Value chain.
        Scope3 => "scope3",
    }
}

/// Locational marginal price at a pricing node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmpPrice {
    /// Pricing node name.
    pub node: String,
    /// Market run the price cleared in.
    pub market_run: MarketRun,
    /// Total LMP in $/MWh.
    pub lmp_total: Decimal,
    /// Energy component.
    pub lmp_energy: Decimal,
    /// Congestion component.
    pub lmp_congestion: Decimal,
    /// Marginal loss component.
    pub lmp_losses: Decimal,
    /// Cleared energy, when the feed reports it.
    pub cleared_mwh: Option<Decimal>,
}

/// Ancillary service clearing price for a region and product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncillaryPrice {
    /// AS region.
    pub region: String,
    /// Service product.
    pub product: AsProduct,
    /// Market run the price cleared in (`DAM` or `RTM`).
    pub market_run: MarketRun,
    /// Clearing price in $/MW.
    pub clearing_price: Decimal,
    /// Cleared capacity, when reported.
    pub cleared_mw: Option<Decimal>,
}

/// Congestion revenue right auction award.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CongestionRevenueRight {
    /// Award identifier.
    pub crr_id: String,
    /// Source pricing node.
    pub source_node: String,
    /// Sink pricing node.
    pub sink_node: String,
    /// Time-of-use class.
    pub time_of_use: TimeOfUse,
    /// Obligation or option.
    pub hedge_type: HedgeType,
    /// Awarded megawatts.
    pub mw: Decimal,
    /// Auction clearing price in $/MW.
    pub clearing_price: Decimal,
}

/// Load by balancing area and zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadDemand {
    /// Market operator.
    pub market: String,
    /// Balancing area.
    pub ba: String,
    /// Load zone.
    pub zone: String,
    /// Demand in MW.
    pub demand_mw: Decimal,
    /// Upstream dataset label.
    pub data_source: String,
}

/// Metered output of a generating resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationActual {
    /// Market operator.
    pub market: String,
    /// Balancing area.
    pub ba: String,
    /// Zone the resource sits in.
    pub zone: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Resource class, e.g. `solar`.
    pub resource_type: String,
    /// Primary fuel.
    pub fuel: String,
    /// Instantaneous output in MW.
    pub output_mw: Decimal,
    /// Energy over the interval in MWh.
    pub output_mwh: Decimal,
    /// Upstream dataset label.
    pub data_source: String,
}

/// Renewable energy certificate ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecCertificate {
    /// Generation year of the certificate.
    pub vintage_year: i32,
    /// Market or registry region.
    pub market: String,
    /// Load-serving entity holding the certificate.
    pub lse: String,
    /// Registry certificate id.
    pub certificate_id: String,
    /// Generating resource.
    pub resource_id: String,
    /// Certified energy.
    pub mwh: Decimal,
    /// Lifecycle status.
    pub status: CertificateStatus,
    /// Retirement year, required once retired.
    pub retired_year: Option<i32>,
    /// Upstream dataset label.
    pub data_source: String,
}

/// Emission factor for a fuel and scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionFactor {
    /// Fuel the factor applies to.
    pub fuel: String,
    /// GHG protocol scope.
    pub scope: EmissionScope,
    /// Emission intensity.
    pub kg_co2e_per_mwh: Decimal,
    /// Publishing body.
    pub source: String,
    /// First day the factor applies.
    pub effective_date: NaiveDate,
    /// Day the factor stops applying, if any.
    pub expires_at: Option<NaiveDate>,
}

/// Typed Silver payload; one variant per schema family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SilverPayload {
    /// `lmp_dam` / `lmp_rtm`.
    Lmp(LmpPrice),
    /// `as_dam` / `as_rtm`.
    Ancillary(AncillaryPrice),
    /// `crr`.
    Crr(CongestionRevenueRight),
    /// `load_demand`.
    Load(LoadDemand),
    /// `generation_actual`.
    Generation(GenerationActual),
    /// `rec_ledger`.
    Rec(RecCertificate),
    /// `emission_factors`.
    Emission(EmissionFactor),
}

/// A single value projected for OHLC aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Window instrument; prices are qualified by their market run.
    pub instrument_id: String,
    /// Value folded into open/high/low/close.
    pub value: Decimal,
    /// Value added to the window volume.
    pub volume: Decimal,
}

impl SilverPayload {
    /// Project the aggregation observation, if this payload is aggregated.
    #[must_use]
    pub fn observation(&self) -> Option<Observation> {
        let (instrument_id, value, volume) = match self {
            Self::Lmp(p) => (
                format!("{}:{}", p.node, p.market_run),
                p.lmp_total,
                p.cleared_mwh.unwrap_or(Decimal::ZERO),
            ),
            Self::Ancillary(p) => (
                format!("{}:{}:{}", p.region, p.product, p.market_run),
                p.clearing_price,
                p.cleared_mw.unwrap_or(Decimal::ZERO),
            ),
            Self::Crr(p) => (
                format!(
                    "{}>{}:{}:{}",
                    p.source_node, p.sink_node, p.time_of_use, p.hedge_type
                ),
                p.clearing_price,
                p.mw,
            ),
            Self::Load(p) => (format!("{}:{}", p.ba, p.zone), p.demand_mw, Decimal::ZERO),
            Self::Generation(p) => (p.resource_id.clone(), p.output_mw, p.output_mwh),
            Self::Rec(_) | Self::Emission(_) => return None,
        };
        Some(Observation {
            instrument_id,
            value,
            volume,
        })
    }

    /// Identifier used for reference lookups.
    ///
    /// Unlike the window instrument this ignores the market run, so DAM and
    /// real-time prices of one node share reference data.
    #[must_use]
    pub fn instrument_id(&self) -> String {
        match self {
            Self::Lmp(p) => p.node.clone(),
            Self::Ancillary(p) => format!("{}:{}", p.region, p.product),
            Self::Rec(p) => p.resource_id.clone(),
            Self::Emission(p) => p.fuel.clone(),
            other => other
                .observation()
                .map(|o| o.instrument_id)
                .unwrap_or_default(),
        }
    }

    /// Region carried by the record itself, if any.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        match self {
            Self::Ancillary(p) => Some(&p.region),
            Self::Load(p) => Some(&p.zone),
            Self::Generation(p) => Some(&p.zone),
            Self::Rec(p) => Some(&p.market),
            Self::Lmp(_) | Self::Crr(_) | Self::Emission(_) => None,
        }
    }

    /// Price used for price-derived flags, if the payload is priced.
    #[must_use]
    pub const fn price(&self) -> Option<Decimal> {
        match self {
            Self::Lmp(p) => Some(p.lmp_total),
            Self::Ancillary(p) => Some(p.clearing_price),
            Self::Crr(p) => Some(p.clearing_price),
            _ => None,
        }
    }
}

/// Validated, typed projection of a Bronze record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilverRecord {
    lineage: RecordId,
    data_type: DataType,
    schema_version: SchemaVersion,
    tenant_id: String,
    source: String,
    observed_at: DateTime<Utc>,
    payload: SilverPayload,
}

impl SilverRecord {
    /// Assemble a Silver record. Called by the normalizer once every field
    /// has been validated.
    #[must_use]
    pub const fn new(
        lineage: RecordId,
        data_type: DataType,
        schema_version: SchemaVersion,
        tenant_id: String,
        source: String,
        observed_at: DateTime<Utc>,
        payload: SilverPayload,
    ) -> Self {
        Self {
            lineage,
            data_type,
            schema_version,
            tenant_id,
            source,
            observed_at,
            payload,
        }
    }

    /// Identity of the originating Bronze record.
    #[must_use]
    pub const fn lineage(&self) -> &RecordId {
        &self.lineage
    }

    /// Data type of the origin.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Schema version of the origin.
    #[must_use]
    pub const fn schema_version(&self) -> SchemaVersion {
        self.schema_version
    }

    /// Owning tenant.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Source label of the origin.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Business timestamp of the record.
    #[must_use]
    pub const fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Typed payload.
    #[must_use]
    pub const fn payload(&self) -> &SilverPayload {
        &self.payload
    }
}

/// Well-known enrichment context keys.
pub mod context_keys {
    /// Program-eligibility flag.
    pub const PROGRAM_ELIGIBLE: &str = "program_eligible";
    /// Region code from reference data or the record itself.
    pub const REGION_CODE: &str = "region_code";
    /// Applicable tariff/rate from reference data.
    pub const APPLICABLE_RATE: &str = "applicable_rate";
    /// Market participant owning the instrument.
    pub const PARTICIPANT_ID: &str = "participant_id";
    /// Price below zero.
    pub const NEGATIVE_PRICE: &str = "negative_price";
    /// Interval falls in the on-peak block.
    pub const ON_PEAK: &str = "on_peak";
    /// Congestion component as a share of the total LMP.
    pub const CONGESTION_SHARE: &str = "congestion_share";
}

/// Value of a derived enrichment field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContextValue {
    /// Derived flag.
    Bool(bool),
    /// Numeric value such as a rate or share.
    Number(Decimal),
    /// Code or identifier.
    Text(String),
    /// Reference data had no entry for this field.
    NoMatch,
}

/// Derived business fields attached by the enricher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentContext {
    fields: BTreeMap<String, ContextValue>,
    matched: bool,
    enriched_at: DateTime<Utc>,
}

impl EnrichmentContext {
    /// Start an empty context.
    #[must_use]
    pub const fn new(matched: bool, enriched_at: DateTime<Utc>) -> Self {
        Self {
            fields: BTreeMap::new(),
            matched,
            enriched_at,
        }
    }

    /// Set a field, replacing any previous value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: ContextValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Look up a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.fields.get(key)
    }

    /// Boolean field, `None` when absent, `NoMatch` or not boolean.
    #[must_use]
    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.fields.get(key) {
            Some(ContextValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// True when the field is explicitly marked as having no reference match.
    #[must_use]
    pub fn is_no_match(&self, key: &str) -> bool {
        matches!(self.fields.get(key), Some(ContextValue::NoMatch))
    }

    /// Whether any reference entry matched the record.
    #[must_use]
    pub const fn matched(&self) -> bool {
        self.matched
    }

    /// When enrichment happened.
    #[must_use]
    pub const fn enriched_at(&self) -> DateTime<Utc> {
        self.enriched_at
    }

    /// All fields in key order.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, ContextValue> {
        &self.fields
    }
}

/// Silver record plus business context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldRecord {
    silver: SilverRecord,
    context: EnrichmentContext,
}

impl GoldRecord {
    /// Attach a context to a Silver record. Called by the enricher.
    #[must_use]
    pub const fn new(silver: SilverRecord, context: EnrichmentContext) -> Self {
        Self { silver, context }
    }

    /// Underlying Silver record.
    #[must_use]
    pub const fn silver(&self) -> &SilverRecord {
        &self.silver
    }

    /// Enrichment context.
    #[must_use]
    pub const fn context(&self) -> &EnrichmentContext {
        &self.context
    }

    /// Shortcut to the origin's data type.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.silver.data_type
    }

    /// Shortcut to the origin's identity.
    #[must_use]
    pub const fn lineage(&self) -> &RecordId {
        &self.silver.lineage
    }
}
