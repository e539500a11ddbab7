use medallion_core::BronzeRecord;
use serde_json::json;

/// Zonal load reading; aggregates under `<ba>:<zone>`.
pub fn load_demand(ba: &str, zone: &str, epoch_secs: i64, demand_mw: &str) -> BronzeRecord {
    BronzeRecord::from_json(
        "load_demand",
        super::SOURCE,
        json!({
            "timestamp": epoch_secs,
            "market": "CAISO",
            "ba": ba,
            "zone": zone,
            "demand_mw": demand_mw,
            "data_source": "oasis",
        }),
    )
}

/// REC ledger entry. Pass `retired_year` for retired certificates.
pub fn rec(
    certificate_id: &str,
    vintage_year: i32,
    status: &str,
    retired_year: Option<i32>,
) -> BronzeRecord {
    let mut fields = json!({
        "vintage_year": vintage_year,
        "market": "CAISO",
        "lse": "PGAE",
        "certificate_id": certificate_id,
        "resource_id": "SOLAR_01",
        "mwh": "100",
        "status": status,
        "data_source": "wregis",
    });
    if let (Some(year), Some(obj)) = (retired_year, fields.as_object_mut()) {
        obj.insert("retired_year".into(), json!(year));
    }
    BronzeRecord::from_json("rec_ledger", super::SOURCE, fields)
}

/// Emission factor effective from `effective_date` (YYYY-MM-DD).
pub fn emission_factor(fuel: &str, effective_date: &str, kg_per_mwh: &str) -> BronzeRecord {
    BronzeRecord::from_json(
        "emission_factors",
        super::SOURCE,
        json!({
            "fuel": fuel,
            "scope": "scope1",
            "kg_co2e_per_mwh": kg_per_mwh,
            "source": "epa",
            "effective_date": effective_date,
        }),
    )
}
