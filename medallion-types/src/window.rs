//! Aggregation window keys, accumulators and sink rows.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data_type::DataType;
use crate::error::PipelineError;

const MINUTES_PER_DAY: u32 = 1_440;

/// Bucket width in whole minutes.
///
/// Widths must divide a day so that buckets tile it without a ragged tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct IntervalSize(u32);

impl IntervalSize {
    /// Five-minute bars.
    pub const FIVE_MINUTES: Self = Self(5);
    /// Fifteen-minute bars.
    pub const FIFTEEN_MINUTES: Self = Self(15);
    /// Hourly bars.
    pub const HOURLY: Self = Self(60);
    /// Daily bars.
    pub const DAILY: Self = Self(MINUTES_PER_DAY);

    /// Validate and wrap a width in minutes.
    ///
    /// # Errors
    /// Returns `InvalidConfig` when `minutes` is zero, exceeds a day, or does
    /// not divide 1440.
    pub fn from_minutes(minutes: u32) -> Result<Self, PipelineError> {
        if minutes == 0 || minutes > MINUTES_PER_DAY || MINUTES_PER_DAY % minutes != 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "interval of {minutes} minutes does not divide a day"
            )));
        }
        Ok(Self(minutes))
    }

    /// Width in minutes.
    #[must_use]
    pub const fn minutes(self) -> u32 {
        self.0
    }

    /// Width in seconds.
    #[must_use]
    pub const fn seconds(self) -> i64 {
        self.0 as i64 * 60
    }
}

impl Default for IntervalSize {
    fn default() -> Self {
        Self::FIVE_MINUTES
    }
}

impl TryFrom<u32> for IntervalSize {
    type Error = String;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        Self::from_minutes(minutes).map_err(|e| e.to_string())
    }
}

impl From<IntervalSize> for u32 {
    fn from(i: IntervalSize) -> Self {
        i.0
    }
}

impl fmt::Display for IntervalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.0)
    }
}

/// How bucket boundaries are anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketAlignment {
    /// Boundaries are multiples of the width since the Unix epoch.
    #[default]
    Utc,
    /// Boundaries are anchored at local midnight in a market time zone.
    Market(chrono_tz::Tz),
}

/// Unique identity of an aggregation bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowKey {
    /// Tenant owning the window.
    pub tenant_id: String,
    /// Series identity, e.g. `node:DAM` for LMPs.
    pub instrument_id: String,
    /// Inclusive bucket start.
    pub interval_start: DateTime<Utc>,
    /// Bucket width.
    pub interval_size: IntervalSize,
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}+{}",
            self.tenant_id,
            self.instrument_id,
            self.interval_start.to_rfc3339(),
            self.interval_size
        )
    }
}

/// Running OHLC accumulators for one bucket.
///
/// The key is fixed at creation; only the accumulators move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationWindow {
    key: WindowKey,
    data_type: DataType,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    trade_count: u64,
    updated_at: DateTime<Utc>,
}

impl AggregationWindow {
    /// Open a window from its first observation.
    #[must_use]
    pub const fn open_with(
        key: WindowKey,
        data_type: DataType,
        value: Decimal,
        volume: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            data_type,
            open: value,
            high: value,
            low: value,
            close: value,
            volume,
            trade_count: 1,
            updated_at: at,
        }
    }

    /// Fold a later observation (in arrival order) into the accumulators.
    pub fn apply(&mut self, value: Decimal, volume: Decimal, at: DateTime<Utc>) {
        if value > self.high {
            self.high = value;
        }
        if value < self.low {
            self.low = value;
        }
        self.close = value;
        self.volume += volume;
        self.trade_count += 1;
        self.updated_at = at;
    }

    /// Bucket identity.
    #[must_use]
    pub const fn key(&self) -> &WindowKey {
        &self.key
    }

    /// Data type that opened the bucket.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// First value in arrival order.
    #[must_use]
    pub const fn open(&self) -> Decimal {
        self.open
    }

    /// Running maximum.
    #[must_use]
    pub const fn high(&self) -> Decimal {
        self.high
    }

    /// Running minimum.
    #[must_use]
    pub const fn low(&self) -> Decimal {
        self.low
    }

    /// Most recently processed value.
    #[must_use]
    pub const fn close(&self) -> Decimal {
        self.close
    }

    /// Running volume sum.
    #[must_use]
    pub const fn volume(&self) -> Decimal {
        self.volume
    }

    /// Number of distinct records folded in.
    #[must_use]
    pub const fn trade_count(&self) -> u64 {
        self.trade_count
    }

    /// Last time an observation was applied.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Project the sink row for this window.
    ///
    /// ```
    /// use chrono::{DateTime, Utc};
    /// use medallion_types::{AggregationWindow, DataType, IntervalSize, WindowKey};
    /// use rust_decimal::Decimal;
    ///
    /// let t0: DateTime<Utc> = DateTime::from_timestamp(1_704_067_200, 0).unwrap();
    /// let key = WindowKey {
    ///     tenant_id: "default".into(),
    ///     instrument_id: "TH_NP15_GEN-APND:DAM".into(),
    ///     interval_start: t0,
    ///     interval_size: IntervalSize::HOURLY,
    /// };
    /// let (high, low) = (Decimal::new(42, 0), Decimal::new(40, 0));
    /// let mut w = AggregationWindow::open_with(key, DataType::LmpDam, high, Decimal::ONE, t0);
    /// w.apply(low, Decimal::ONE, t0);
    ///
    /// let row = w.to_row(serde_json::json!({}), t0);
    /// assert_eq!(row.instrument_id, "TH_NP15_GEN-APND:DAM");
    /// assert_eq!(row.interval_minutes, 60);
    /// assert_eq!((row.open_price, row.low_price, row.close_price), (high, low, low));
    /// assert_eq!(row.trade_count, 2);
    /// assert_eq!(row.conflict_key().2, t0);
    /// ```
    #[must_use]
    pub fn to_row(&self, metadata: serde_json::Value, created_at: DateTime<Utc>) -> SummaryRow {
        SummaryRow {
            tenant_id: self.key.tenant_id.clone(),
            instrument_id: self.key.instrument_id.clone(),
            interval_start: self.key.interval_start,
            interval_minutes: self.key.interval_size.minutes(),
            open_price: self.open,
            high_price: self.high,
            low_price: self.low,
            close_price: self.close,
            volume: self.volume,
            trade_count: self.trade_count,
            metadata,
            created_at,
        }
    }
}

/// Row written to the aggregated output table.
///
/// Sinks replace on conflict keyed by `(tenant_id, instrument_id, interval_start)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    /// Tenant owning the window.
    pub tenant_id: String,
    /// Series identity of the window.
    pub instrument_id: String,
    /// Inclusive bucket start.
    pub interval_start: DateTime<Utc>,
    /// Bucket width in minutes.
    pub interval_minutes: u32,
    /// Value of the earliest observation.
    pub open_price: Decimal,
    /// Highest observed value.
    pub high_price: Decimal,
    /// Lowest observed value.
    pub low_price: Decimal,
    /// Value of the latest observation.
    pub close_price: Decimal,
    /// Sum of observation volumes.
    pub volume: Decimal,
    /// Distinct records folded into the window.
    pub trade_count: u64,
    /// Data type and enrichment details for the window.
    pub metadata: serde_json::Value,
    /// When this snapshot of the window was produced.
    pub created_at: DateTime<Utc>,
}

impl SummaryRow {
    /// Replace-on-conflict key.
    #[must_use]
    pub fn conflict_key(&self) -> (String, String, DateTime<Utc>) {
        (
            self.tenant_id.clone(),
            self.instrument_id.clone(),
            self.interval_start,
        )
    }
}
