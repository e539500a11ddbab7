//! Snapshot tables: load, generation, REC ledger and emission factors.

use chrono::{DateTime, NaiveDate, Utc};
use medallion_types::{
    CertificateStatus, EmissionFactor, EmissionScope, GenerationActual, LoadDemand,
    PipelineError, RecCertificate, SilverPayload,
};

use super::fields::Fields;

pub fn load(f: &Fields<'_>) -> Result<(DateTime<Utc>, SilverPayload), PipelineError> {
    let observed_at = f.instant("timestamp")?;
    Ok((
        observed_at,
        SilverPayload::Load(LoadDemand {
            market: f.string("market")?,
            ba: f.string("ba")?,
            zone: f.string("zone")?,
            demand_mw: f.non_negative("demand_mw")?,
            data_source: f.string("data_source")?,
        }),
    ))
}

pub fn generation(f: &Fields<'_>) -> Result<(DateTime<Utc>, SilverPayload), PipelineError> {
    let observed_at = f.instant("timestamp")?;
    Ok((
        observed_at,
        SilverPayload::Generation(GenerationActual {
            market: f.string("market")?,
            ba: f.string("ba")?,
            zone: f.string("zone")?,
            resource_id: f.string("resource_id")?,
            resource_type: f.string("resource_type")?,
            fuel: f.string("fuel")?,
            output_mw: f.non_negative("output_mw")?,
            output_mwh: f.non_negative("output_mwh")?,
            data_source: f.string("data_source")?,
        }),
    ))
}

pub fn rec(f: &Fields<'_>) -> Result<(DateTime<Utc>, SilverPayload), PipelineError> {
    let vintage_year = f.year("vintage_year")?;
    let status = f.declared(
        "status",
        CertificateStatus::parse_declared,
        CertificateStatus::DECLARED,
    )?;
    let retired_year = f.opt_year("retired_year")?;
    match (status, retired_year) {
        (CertificateStatus::Retired, None) => {
            return Err(PipelineError::validation(
                "retired_year",
                "required when status is retired",
            ));
        }
        (_, Some(year)) if year < vintage_year => {
            return Err(PipelineError::validation(
                "retired_year",
                format!("{year} precedes vintage {vintage_year}"),
            ));
        }
        _ => {}
    }
    let observed_at = year_start(vintage_year)
        .ok_or_else(|| PipelineError::validation("vintage_year", "not a calendar year"))?;
    Ok((
        observed_at,
        SilverPayload::Rec(RecCertificate {
            vintage_year,
            market: f.string("market")?,
            lse: f.string("lse")?,
            certificate_id: f.string("certificate_id")?,
            resource_id: f.string("resource_id")?,
            mwh: f.non_negative("mwh")?,
            status,
            retired_year,
            data_source: f.string("data_source")?,
        }),
    ))
}

pub fn emission(f: &Fields<'_>) -> Result<(DateTime<Utc>, SilverPayload), PipelineError> {
    let fuel = f.string("fuel")?;
    let scope = f.declared("scope", EmissionScope::parse_declared, EmissionScope::DECLARED)?;
    let kg_co2e_per_mwh = f.non_negative("kg_co2e_per_mwh")?;
    let source = f.string("source")?;
    let effective_date = f.date("effective_date")?;
    let expires_at = f.opt_date("expires_at")?;
    if let Some(expiry) = expires_at
        && expiry <= effective_date
    {
        return Err(PipelineError::validation(
            "expires_at",
            format!("{expiry} is not after effective date {effective_date}"),
        ));
    }
    let observed_at = day_start(effective_date)
        .ok_or_else(|| PipelineError::validation("effective_date", "not a calendar date"))?;
    Ok((
        observed_at,
        SilverPayload::Emission(EmissionFactor {
            fuel,
            scope,
            kg_co2e_per_mwh,
            source,
            effective_date,
            expires_at,
        }),
    ))
}

fn year_start(year: i32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, 1, 1).and_then(day_start)
}

fn day_start(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
}
