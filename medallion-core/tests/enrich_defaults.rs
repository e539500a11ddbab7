use std::sync::Arc;

use chrono::{DateTime, Utc};
use medallion_core::{
    BronzeRecord, ContextValue, EligibilityPredicate, Enricher, Normalizer, ReferenceEntry,
    SilverRecord, StaticReferenceTable, context_keys,
};
use rust_decimal::Decimal;
use serde_json::json;

fn lmp(node: &str, ts: &str, price: &str) -> SilverRecord {
    let rec = BronzeRecord::from_json(
        "lmp_dam",
        "caiso",
        json!({
            "timestamp": ts,
            "node": node,
            "lmp_usd_per_mwh": price,
            "lmp_congestion_usd_per_mwh": "2.50",
        }),
    );
    Normalizer::default().normalize(&rec).unwrap()
}

fn load(zone: &str) -> SilverRecord {
    let rec = BronzeRecord::from_json(
        "load_demand",
        "eia",
        json!({
            "timestamp": "2024-01-02T18:00:00Z",
            "market": "CAISO",
            "ba": "CISO",
            "zone": zone,
            "demand_mw": "2100.5",
            "data_source": "eia930",
        }),
    );
    Normalizer::default().normalize(&rec).unwrap()
}

fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

#[tokio::test]
async fn missing_reference_entry_is_a_value_not_an_error() {
    let enricher = Enricher::new(Arc::new(StaticReferenceTable::new()));
    let gold = enricher
        .enrich(lmp("TH_NP15_GEN-APND", "2024-01-01T00:00:00Z", "45.67"))
        .await
        .expect("absent reference data never fails");

    let ctx = gold.context();
    assert!(!ctx.matched());
    assert!(ctx.is_no_match(context_keys::PROGRAM_ELIGIBLE));
    assert!(ctx.is_no_match(context_keys::PARTICIPANT_ID));
    assert!(ctx.is_no_match(context_keys::APPLICABLE_RATE));
    assert_eq!(ctx.flag(context_keys::PROGRAM_ELIGIBLE), None);
    assert_eq!(ctx.flag(context_keys::NEGATIVE_PRICE), Some(false));
}

#[tokio::test]
async fn program_membership_drives_eligibility() {
    let table: StaticReferenceTable = [
        ReferenceEntry::new("NODE_A")
            .with_program("EDAM")
            .with_participant("PG&E")
            .with_rate(Decimal::new(125, 2)),
        ReferenceEntry::new("NODE_B").with_program("WEIM"),
    ]
    .into_iter()
    .collect();
    let enricher = Enricher::new(Arc::new(table));

    let a = enricher
        .enrich(lmp("NODE_A", "2024-01-02T18:00:00Z", "30"))
        .await
        .unwrap();
    assert!(a.context().matched());
    assert_eq!(a.context().flag(context_keys::PROGRAM_ELIGIBLE), Some(true));
    assert_eq!(
        a.context().get(context_keys::PARTICIPANT_ID),
        Some(&ContextValue::Text("PG&E".into()))
    );
    assert_eq!(
        a.context().get(context_keys::APPLICABLE_RATE),
        Some(&ContextValue::Number(Decimal::new(125, 2)))
    );

    let b = enricher
        .enrich(lmp("NODE_B", "2024-01-02T18:00:00Z", "30"))
        .await
        .unwrap();
    assert_eq!(b.context().flag(context_keys::PROGRAM_ELIGIBLE), Some(false));
}

#[tokio::test]
async fn entries_outside_their_validity_do_not_match() {
    let table: StaticReferenceTable = [ReferenceEntry::new("NODE_A")
        .with_program("EDAM")
        .valid_between(Some(at("2024-06-01T00:00:00Z")), None)]
    .into_iter()
    .collect();
    let enricher = Enricher::new(Arc::new(table));
    let before = enricher
        .enrich(lmp("NODE_A", "2024-01-02T18:00:00Z", "30"))
        .await
        .unwrap();
    assert!(before.context().is_no_match(context_keys::PROGRAM_ELIGIBLE));
    let after = enricher
        .enrich(lmp("NODE_A", "2024-07-02T18:00:00Z", "30"))
        .await
        .unwrap();
    assert_eq!(after.context().flag(context_keys::PROGRAM_ELIGIBLE), Some(true));
}

#[tokio::test]
async fn region_specific_entries_win() {
    let table: StaticReferenceTable = [
        ReferenceEntry::new("CISO:PGAE").with_region_code("GENERIC"),
        ReferenceEntry::new("CISO:PGAE")
            .in_region("PGAE")
            .with_region_code("NP15"),
        ReferenceEntry::new("CISO:PGAE")
            .in_region("SCE")
            .with_region_code("SP15"),
    ]
    .into_iter()
    .collect();
    let enricher = Enricher::new(Arc::new(table));
    let gold = enricher.enrich(load("PGAE")).await.unwrap();
    assert_eq!(
        gold.context().get(context_keys::REGION_CODE),
        Some(&ContextValue::Text("NP15".into()))
    );
}

#[tokio::test]
async fn record_region_is_used_without_reference_data() {
    let enricher = Enricher::new(Arc::new(StaticReferenceTable::new()));
    let gold = enricher.enrich(load("SCE")).await.unwrap();
    assert_eq!(
        gold.context().get(context_keys::REGION_CODE),
        Some(&ContextValue::Text("SCE".into()))
    );
    assert!(gold.context().get(context_keys::NEGATIVE_PRICE).is_none());
}

#[tokio::test]
async fn derived_price_flags() {
    let enricher = Enricher::new(Arc::new(StaticReferenceTable::new()));
    let gold = enricher
        .enrich(lmp("NODE_A", "2024-01-02T18:00:00Z", "-5.00"))
        .await
        .unwrap();
    let ctx = gold.context();
    assert_eq!(ctx.flag(context_keys::NEGATIVE_PRICE), Some(true));
    // 10:00 PST on a Tuesday.
    assert_eq!(ctx.flag(context_keys::ON_PEAK), Some(true));
    assert_eq!(
        ctx.get(context_keys::CONGESTION_SHARE),
        Some(&ContextValue::Number(Decimal::new(-5, 1)))
    );
}

struct Always;

impl EligibilityPredicate for Always {
    fn is_eligible(&self, _record: &SilverRecord, _entry: &ReferenceEntry) -> bool {
        true
    }
}

#[tokio::test]
async fn predicate_is_pluggable() {
    let table: StaticReferenceTable = [ReferenceEntry::new("NODE_A")].into_iter().collect();
    let enricher = Enricher::new(Arc::new(table)).with_predicate(Arc::new(Always));
    let gold = enricher
        .enrich(lmp("NODE_A", "2024-01-02T18:00:00Z", "30"))
        .await
        .unwrap();
    assert_eq!(gold.context().flag(context_keys::PROGRAM_ELIGIBLE), Some(true));
}
