//! Deterministic Bronze records and reference data.

mod ledger;
mod market;

use chrono::{DateTime, Utc};
use medallion_core::{ReferenceEntry, StaticReferenceTable};
use rust_decimal::Decimal;

pub use ledger::{emission_factor, load_demand, rec};
pub use market::{ancillary, lmp, lmp_bad_price, lmp_example, lmp_rtm, unsupported};

/// Source label stamped on every fixture record.
pub const SOURCE: &str = "caiso";

/// 2024-01-01T00:00:00Z.
pub const T0: i64 = 1_704_067_200;

/// `T0` as a timestamp.
pub fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(T0, 0).unwrap_or_default()
}

/// Reference table with `TH_NP15_GEN-APND` enrolled in EDAM and `TH_SP15_GEN-APND` not.
pub fn reference_table() -> StaticReferenceTable {
    [
        ReferenceEntry::new("TH_NP15_GEN-APND")
            .with_program("EDAM")
            .with_region_code("NP15")
            .with_rate(Decimal::new(125, 2))
            .with_participant("PGAE"),
        ReferenceEntry::new("TH_SP15_GEN-APND").with_region_code("SP15"),
    ]
    .into_iter()
    .collect()
}
