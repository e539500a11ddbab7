//! Streaming topic naming: `<domain>.<market>.<source>.<data_type>.<stage>.v<version>`.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data_type::{DataType, SchemaVersion};
use crate::error::PipelineError;

/// Pipeline tier addressed by a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStage {
    /// Bronze records as received.
    Raw,
    /// Silver records.
    Normalized,
    /// Gold records.
    Enriched,
    /// Summary rows.
    Aggregated,
    /// Dead letters.
    Dlq,
}

impl TopicStage {
    /// Segment label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Normalized => "normalized",
            Self::Enriched => "enriched",
            Self::Aggregated => "aggregated",
            Self::Dlq => "dlq",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(Self::Raw),
            "normalized" => Some(Self::Normalized),
            "enriched" => Some(Self::Enriched),
            "aggregated" => Some(Self::Aggregated),
            "dlq" => Some(Self::Dlq),
            _ => None,
        }
    }
}

impl fmt::Display for TopicStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured topic name.
///
/// The data type segment is rendered with dots (`lmp.dam`), so a name has at
/// least six dot-separated segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicName {
    /// Owning domain, e.g. `ingestion`.
    pub domain: String,
    /// Market segment.
    pub market: String,
    /// Upstream source segment.
    pub source: String,
    /// Payload data type.
    pub data_type: DataType,
    /// Medallion tier the topic carries.
    pub stage: TopicStage,
    /// Schema version suffix.
    pub version: SchemaVersion,
}

impl TopicName {
    /// Ingestion-domain topic for a market feed.
    pub fn ingestion(
        market: impl Into<String>,
        source: impl Into<String>,
        data_type: DataType,
        stage: TopicStage,
    ) -> Self {
        Self {
            domain: "ingestion".to_string(),
            market: market.into(),
            source: source.into(),
            data_type,
            stage,
            version: SchemaVersion(1),
        }
    }

    /// Same topic at another stage (e.g. the dead-letter twin of a raw topic).
    #[must_use]
    pub fn at_stage(&self, stage: TopicStage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}.{}",
            self.domain,
            self.market,
            self.source,
            self.data_type.topic_segment(),
            self.stage,
            self.version
        )
    }
}

impl FromStr for TopicName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| PipelineError::InvalidArg(format!("topic `{s}`: {why}"));
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() < 6 {
            return Err(invalid("expected at least six segments"));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty segment"));
        }
        let n = parts.len();
        let version = parts[n - 1]
            .strip_prefix('v')
            .and_then(|v| v.parse::<u16>().ok())
            .ok_or_else(|| invalid("version segment must look like v<N>"))?;
        let stage = TopicStage::parse(parts[n - 2]).ok_or_else(|| invalid("unknown stage"))?;
        let data_type = parts[3..n - 2]
            .join(".")
            .parse::<DataType>()
            .map_err(|_| invalid("unknown data type"))?;
        Ok(Self {
            domain: parts[0].to_string(),
            market: parts[1].to_string(),
            source: parts[2].to_string(),
            data_type,
            stage,
            version: SchemaVersion(version),
        })
    }
}
