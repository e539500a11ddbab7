use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Market record categories with a declared field schema.
///
/// Each variant maps one-to-one to a Silver payload shape. Tags are the
/// snake_case identifiers carried by Bronze records (`lmp_dam`, `crr`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DataType {
    /// Day-ahead locational marginal prices.
    LmpDam,
    /// Real-time locational marginal prices.
    LmpRtm,
    /// Day-ahead ancillary service clearing prices.
    AsDam,
    /// Real-time ancillary service clearing prices.
    AsRtm,
    /// Congestion revenue right auction results.
    Crr,
    /// Balancing-area load by zone.
    LoadDemand,
    /// Per-resource metered generation.
    GenerationActual,
    /// Renewable energy certificate ledger entries.
    RecLedger,
    /// Fuel emission factors.
    EmissionFactors,
}

/// Wire schema version of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersion(pub u16);

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl DataType {
    /// Every supported data type, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::LmpDam,
        Self::LmpRtm,
        Self::AsDam,
        Self::AsRtm,
        Self::Crr,
        Self::LoadDemand,
        Self::GenerationActual,
        Self::RecLedger,
        Self::EmissionFactors,
    ];

    /// Stable snake_case tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LmpDam => "lmp_dam",
            Self::LmpRtm => "lmp_rtm",
            Self::AsDam => "as_dam",
            Self::AsRtm => "as_rtm",
            Self::Crr => "crr",
            Self::LoadDemand => "load_demand",
            Self::GenerationActual => "generation_actual",
            Self::RecLedger => "rec_ledger",
            Self::EmissionFactors => "emission_factors",
        }
    }

    /// Versions the static registry accepts for this type.
    #[must_use]
    pub const fn supported_versions(self) -> &'static [SchemaVersion] {
        match self {
            Self::LmpDam | Self::LmpRtm => &[SchemaVersion(1), SchemaVersion(2)],
            _ => &[SchemaVersion(1)],
        }
    }

    /// Latest declared schema version; used when a record does not declare one.
    #[must_use]
    pub fn current_version(self) -> SchemaVersion {
        self.supported_versions()
            .iter()
            .copied()
            .max()
            .unwrap_or(SchemaVersion(1))
    }

    /// Topic segment form of the tag (`lmp_dam` -> `lmp.dam`).
    #[must_use]
    pub fn topic_segment(self) -> String {
        self.as_str().replace('_', ".")
    }

    /// Whether this type projects observations into OHLC windows.
    #[must_use]
    pub const fn is_aggregated(self) -> bool {
        !matches!(self, Self::RecLedger | Self::EmissionFactors)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase().replace('.', "_");
        Self::ALL
            .into_iter()
            .find(|dt| dt.as_str() == tag)
            .ok_or_else(|| PipelineError::unsupported_type(s))
    }
}
