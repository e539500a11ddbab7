//! Medallion data transfer objects: record tiers, run reports, configuration
//! primitives and the shared error taxonomy.

#![warn(missing_docs)]

mod config;
mod data_type;
mod error;
mod record;
mod reports;
mod topic;
mod window;

pub use config::{BackoffConfig, BreakerConfig, PipelineConfig, StreamConfig};
pub use data_type::{DataType, SchemaVersion};
pub use error::{ErrorKind, PipelineError};
pub use record::{
    AncillaryPrice, AsProduct, BronzeRecord, CertificateStatus, CongestionRevenueRight,
    ContextValue, DEFAULT_TENANT, EmissionFactor, EmissionScope, EnrichmentContext,
    GenerationActual, GoldRecord, HedgeType, LmpPrice, LoadDemand, MarketRun, Observation,
    RecCertificate, RecordId, SilverPayload, SilverRecord, TimeOfUse, context_keys,
};
pub use reports::{ErrorRecord, PipelineRunResult, RunStatus, RunTally, Stage};
pub use topic::{TopicName, TopicStage};
pub use window::{AggregationWindow, BucketAlignment, IntervalSize, SummaryRow, WindowKey};
