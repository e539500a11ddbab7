//! Bronze -> Silver normalization.
//!
//! Each data type has a fixed field map. The normalizer resolves the schema
//! version, coerces every declared field and either returns a complete
//! [`SilverRecord`] or the first validation failure. It performs no I/O.

mod fields;
mod ledger;
mod market;

use std::sync::Arc;

use medallion_types::{BronzeRecord, DataType, PipelineError, SchemaVersion, SilverRecord};

use fields::Fields;

/// Resolves and validates the wire schema version of a Bronze record.
pub trait SchemaRegistry: Send + Sync {
    /// Return the version to normalize against.
    ///
    /// # Errors
    /// Returns a validation error on field `schema_version` when the declared
    /// version is not accepted for `data_type`.
    fn resolve(
        &self,
        data_type: DataType,
        declared: Option<SchemaVersion>,
    ) -> Result<SchemaVersion, PipelineError>;
}

/// In-process registry accepting the versions each data type declares.
///
/// Records without a declared version are read as the current version.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSchemaRegistry;

impl SchemaRegistry for StaticSchemaRegistry {
    fn resolve(
        &self,
        data_type: DataType,
        declared: Option<SchemaVersion>,
    ) -> Result<SchemaVersion, PipelineError> {
        let Some(version) = declared else {
            return Ok(data_type.current_version());
        };
        if data_type.supported_versions().contains(&version) {
            Ok(version)
        } else {
            Err(PipelineError::validation(
                "schema_version",
                format!("{version} is not supported for {data_type}"),
            ))
        }
    }
}

/// Bronze -> Silver transform.
#[derive(Clone)]
pub struct Normalizer {
    registry: Arc<dyn SchemaRegistry>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(Arc::new(StaticSchemaRegistry))
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer").finish_non_exhaustive()
    }
}

impl Normalizer {
    /// Normalizer backed by a custom schema registry.
    #[must_use]
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Normalize one Bronze record.
    ///
    /// # Errors
    /// - `UnsupportedType` when the tag has no declared schema.
    /// - `Validation` naming the offending field for missing required
    ///   fields, malformed values, out-of-set enums or failed range checks.
    pub fn normalize(&self, record: &BronzeRecord) -> Result<SilverRecord, PipelineError> {
        let data_type: DataType = record.data_type().parse()?;
        let schema_version = self.registry.resolve(data_type, record.schema_version())?;
        let f = Fields::new(record);

        let (observed_at, payload) = match data_type {
            DataType::LmpDam | DataType::LmpRtm => market::lmp(data_type, &f)?,
            DataType::AsDam | DataType::AsRtm => market::ancillary(data_type, &f)?,
            DataType::Crr => market::crr(&f)?,
            DataType::LoadDemand => ledger::load(&f)?,
            DataType::GenerationActual => ledger::generation(&f)?,
            DataType::RecLedger => ledger::rec(&f)?,
            DataType::EmissionFactors => ledger::emission(&f)?,
            _ => return Err(PipelineError::unsupported_type(record.data_type())),
        };

        Ok(SilverRecord::new(
            record.identity(),
            data_type,
            schema_version,
            record.tenant_id().to_string(),
            record.source().to_string(),
            observed_at,
            payload,
        ))
    }
}
