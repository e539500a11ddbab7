//! CSV snapshot ingestion.
//!
//! Each logical table has a fixed column set. A file missing any required
//! column is rejected with a `Structural` error before a single row is read.
//! Rows become Bronze records with every non-empty cell as a string field;
//! coercion is left to the normalizer.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use medallion_types::{BronzeRecord, DataType, PipelineError};
use serde_json::{Map, Value};

/// Tables with a CSV snapshot contract, in load order.
pub const SNAPSHOT_TABLES: [DataType; 4] = [
    DataType::LoadDemand,
    DataType::GenerationActual,
    DataType::RecLedger,
    DataType::EmissionFactors,
];

/// Required and optional columns of a snapshot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableColumns {
    /// Columns that must appear in the header.
    pub required: &'static [&'static str],
    /// Columns read when present.
    pub optional: &'static [&'static str],
}

/// Column contract for `table`, or `None` if it has no CSV form.
#[must_use]
pub const fn columns_for(table: DataType) -> Option<TableColumns> {
    let (required, optional): (&[&str], &[&str]) = match table {
        DataType::LoadDemand => (
            &["timestamp", "market", "ba", "zone", "demand_mw", "data_source"],
            &[],
        ),
        DataType::GenerationActual => (
            &[
                "timestamp",
                "market",
                "ba",
                "zone",
                "resource_id",
                "resource_type",
                "fuel",
                "output_mw",
                "output_mwh",
                "data_source",
            ],
            &[],
        ),
        DataType::RecLedger => (
            &[
                "vintage_year",
                "market",
                "lse",
                "certificate_id",
                "resource_id",
                "mwh",
                "status",
                "data_source",
            ],
            &["retired_year"],
        ),
        DataType::EmissionFactors => (
            &["fuel", "scope", "kg_co2e_per_mwh", "source", "effective_date"],
            &["expires_at"],
        ),
        _ => return None,
    };
    Some(TableColumns { required, optional })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_ascii_lowercase(), i))
        .collect()
}

/// Read one table from any reader.
///
/// # Errors
/// - `InvalidArg` if `table` has no CSV contract.
/// - `Structural` if required columns are missing from the header.
/// - `Ingest` on CSV read failures.
pub fn read_table<R: Read>(
    table: DataType,
    source: &str,
    label: &str,
    reader: R,
) -> Result<Vec<BronzeRecord>, PipelineError> {
    let columns = columns_for(table).ok_or_else(|| {
        PipelineError::InvalidArg(format!("{table} has no snapshot table contract"))
    })?;
    let ingest_err = |e: csv::Error| PipelineError::Ingest {
        path: label.to_string(),
        msg: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers().map_err(ingest_err)?.clone();
    let header_map = build_header_map(&headers);

    let missing: Vec<String> = columns
        .required
        .iter()
        .filter(|c| !header_map.contains_key(**c))
        .map(|c| (*c).to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::Structural {
            table: table.as_str().to_string(),
            missing,
        });
    }

    let wanted: Vec<(&str, usize)> = columns
        .required
        .iter()
        .chain(columns.optional)
        .filter_map(|c| header_map.get(*c).map(|idx| (*c, *idx)))
        .collect();

    let mut out = Vec::new();
    for row in reader.records() {
        let row = row.map_err(ingest_err)?;
        let mut fields = Map::new();
        for (name, idx) in &wanted {
            if let Some(cell) = row.get(*idx)
                && !cell.is_empty()
            {
                fields.insert((*name).to_string(), Value::String(cell.to_string()));
            }
        }
        out.push(BronzeRecord::new(table.as_str(), source, fields));
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(table = %table, file = label, rows = out.len(), "read snapshot table");

    Ok(out)
}

/// Read one table from a file path.
///
/// # Errors
/// See [`read_table`]; opening the file maps to `Ingest`.
pub fn read_table_path(
    table: DataType,
    source: &str,
    path: &Path,
) -> Result<Vec<BronzeRecord>, PipelineError> {
    let label = path.display().to_string();
    let file = File::open(path).map_err(|e| PipelineError::Ingest {
        path: label.clone(),
        msg: e.to_string(),
    })?;
    read_table(table, source, &label, file)
}

/// Load every `<table>.csv` present in `dir`.
///
/// Absent files are skipped. Returns tables in [`SNAPSHOT_TABLES`] order.
///
/// # Errors
/// Fails on the first file that is structurally invalid or unreadable.
pub fn load_snapshot_dir(
    dir: &Path,
    source: &str,
) -> Result<Vec<(DataType, Vec<BronzeRecord>)>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::Ingest {
            path: dir.display().to_string(),
            msg: "not a directory".into(),
        });
    }
    let mut out = Vec::new();
    for table in SNAPSHOT_TABLES {
        let path = dir.join(format!("{}.csv", table.as_str()));
        if !path.is_file() {
            continue;
        }
        out.push((table, read_table_path(table, source, &path)?));
    }
    Ok(out)
}
