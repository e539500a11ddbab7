use medallion_core::BronzeRecord;
use serde_json::json;

/// Day-ahead LMP at `node`, stamped `epoch_secs`, with an upstream id.
pub fn lmp(node: &str, epoch_secs: i64, price: &str, id: &str) -> BronzeRecord {
    BronzeRecord::from_json(
        "lmp_dam",
        super::SOURCE,
        json!({
            "timestamp": epoch_secs,
            "node": node,
            "lmp_usd_per_mwh": price,
            "cleared_mwh": "1.0",
        }),
    )
    .with_id(id)
}

/// Real-time LMP at `node`; the market run defaults to `RTM`.
pub fn lmp_rtm(node: &str, epoch_secs: i64, price: &str, id: &str) -> BronzeRecord {
    BronzeRecord::from_json(
        "lmp_rtm",
        super::SOURCE,
        json!({
            "timestamp": epoch_secs,
            "node": node,
            "lmp_usd_per_mwh": price,
            "cleared_mwh": "1.0",
        }),
    )
    .with_id(id)
}

/// The canonical LMP example: total 45.67 with energy 42.10, congestion 2.50
/// and losses 1.07 at `TH_NP15_GEN-APND`, 2024-01-01T00:00:00Z.
pub fn lmp_example() -> BronzeRecord {
    BronzeRecord::from_json(
        "lmp_dam",
        super::SOURCE,
        json!({
            "timestamp": "2024-01-01T00:00:00Z",
            "node": "TH_NP15_GEN-APND",
            "lmp_usd_per_mwh": "45.67",
            "lmp_energy_usd_per_mwh": "42.10",
            "lmp_congestion_usd_per_mwh": "2.50",
            "lmp_marginal_loss_usd_per_mwh": "1.07",
            "market_run_id": "DAM",
        }),
    )
}

/// An LMP record whose price cannot be coerced.
pub fn lmp_bad_price(node: &str, epoch_secs: i64, id: &str) -> BronzeRecord {
    BronzeRecord::from_json(
        "lmp_dam",
        super::SOURCE,
        json!({
            "timestamp": epoch_secs,
            "node": node,
            "lmp_usd_per_mwh": "n/a",
        }),
    )
    .with_id(id)
}

/// Real-time ancillary clearing price.
pub fn ancillary(region: &str, product: &str, epoch_secs: i64, price: &str) -> BronzeRecord {
    BronzeRecord::from_json(
        "as_rtm",
        super::SOURCE,
        json!({
            "timestamp": epoch_secs,
            "region": region,
            "product": product,
            "clearing_price_usd_per_mw": price,
            "cleared_mw": "25",
        }),
    )
}

/// A record carrying a tag no schema declares.
pub fn unsupported(tag: &str) -> BronzeRecord {
    BronzeRecord::from_json(tag, super::SOURCE, json!({ "timestamp": 0 }))
}
