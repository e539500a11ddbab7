use std::sync::Arc;

use chrono::{DateTime, Utc};
use medallion_core::{
    Aggregator, BronzeRecord, BucketAlignment, Enricher, GoldRecord, IntervalSize, Normalizer,
    PipelineError, StaticReferenceTable,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use serde_json::json;

fn gold_at(
    data_type: &str,
    tenant: &str,
    node: &str,
    secs: i64,
    cents: i64,
    id: &str,
) -> GoldRecord {
    let rec = BronzeRecord::from_json(
        data_type,
        "caiso",
        json!({
            "timestamp": secs,
            "node": node,
            "lmp_usd_per_mwh": Decimal::new(cents, 2).to_string(),
            "cleared_mwh": "1.5",
        }),
    )
    .with_tenant(tenant)
    .with_id(id);
    let silver = Normalizer::default().normalize(&rec).unwrap();
    Enricher::new(Arc::new(StaticReferenceTable::new())).apply(silver, None, Utc::now())
}

fn gold(node: &str, secs: i64, cents: i64, id: &str) -> GoldRecord {
    gold_at("lmp_dam", "default", node, secs, cents, id)
}

const T0: i64 = 1_704_067_200; // 2024-01-01T00:00:00Z

#[test]
fn three_records_in_one_bucket() {
    let agg = Aggregator::default();
    let five = IntervalSize::FIVE_MINUTES;
    for (i, (cents, offset)) in [(4567, 0), (4600, 60), (4550, 120)].into_iter().enumerate() {
        agg.aggregate(&gold("TH_NP15", T0 + offset, cents, &format!("r{i}")), five)
            .unwrap()
            .unwrap();
    }
    let windows = agg.snapshot();
    assert_eq!(windows.len(), 1);
    let w = &windows[0];
    assert_eq!(w.open(), Decimal::new(4567, 2));
    assert_eq!(w.high(), Decimal::new(4600, 2));
    assert_eq!(w.low(), Decimal::new(4550, 2));
    assert_eq!(w.close(), Decimal::new(4550, 2));
    assert_eq!(w.trade_count(), 3);
    assert_eq!(w.volume(), Decimal::new(45, 1));
    assert_eq!(
        w.key().interval_start,
        DateTime::<Utc>::from_timestamp(T0, 0).unwrap()
    );
}

#[test]
fn open_follows_arrival_not_timestamp_order() {
    let agg = Aggregator::default();
    let five = IntervalSize::FIVE_MINUTES;
    agg.aggregate(&gold("N", T0 + 200, 1000, "late"), five).unwrap();
    agg.aggregate(&gold("N", T0 + 10, 2000, "early"), five).unwrap();
    let w = &agg.snapshot()[0];
    assert_eq!(w.open(), Decimal::new(1000, 2));
    assert_eq!(w.close(), Decimal::new(2000, 2));
}

#[test]
fn redelivery_is_idempotent() {
    let agg = Aggregator::default();
    let five = IntervalSize::FIVE_MINUTES;
    let rec = gold("N", T0, 4567, "same");
    let first = agg.aggregate(&rec, five).unwrap().unwrap();
    let again = agg.aggregate(&rec, five).unwrap().unwrap();
    assert!(first.applied);
    assert!(!again.applied);
    assert_eq!(again.window.trade_count(), 1);
    assert_eq!(again.window.volume(), first.window.volume());
    assert!(again.row.created_at > first.row.created_at);
}

#[test]
fn windows_never_merge_across_tenants_or_instruments() {
    let agg = Aggregator::default();
    let five = IntervalSize::FIVE_MINUTES;
    agg.aggregate(&gold_at("lmp_dam", "t1", "N", T0, 100, "a"), five).unwrap();
    agg.aggregate(&gold_at("lmp_dam", "t2", "N", T0, 100, "a"), five).unwrap();
    agg.aggregate(&gold_at("lmp_dam", "t1", "M", T0, 100, "a"), five).unwrap();
    assert_eq!(agg.len(), 3);
    assert!(agg.snapshot().iter().all(|w| w.trade_count() == 1));
}

#[test]
fn market_runs_of_one_node_keep_separate_windows() {
    let agg = Aggregator::default();
    let five = IntervalSize::FIVE_MINUTES;
    let dam = agg
        .aggregate(&gold_at("lmp_dam", "default", "N", T0, 100, "a"), five)
        .unwrap()
        .unwrap();
    let rtm = agg
        .aggregate(&gold_at("lmp_rtm", "default", "N", T0, 200, "b"), five)
        .unwrap()
        .unwrap();
    assert_eq!(dam.window.key().instrument_id, "N:DAM");
    assert_eq!(rtm.window.key().instrument_id, "N:RTM");
    assert_eq!(agg.len(), 2);
    assert!(agg.snapshot().iter().all(|w| w.trade_count() == 1));
}

#[test]
fn mixed_data_types_conflict() {
    let agg = Aggregator::default();
    let five = IntervalSize::FIVE_MINUTES;
    let load = BronzeRecord::from_json(
        "load_demand",
        "eia",
        json!({
            "timestamp": T0,
            "market": "CAISO",
            "ba": "CISO",
            "zone": "PGAE",
            "demand_mw": "100",
            "data_source": "eia930",
        }),
    );
    // A resource id that happens to spell a `ba:zone` pair.
    let generation = BronzeRecord::from_json(
        "generation_actual",
        "eia",
        json!({
            "timestamp": T0,
            "market": "CAISO",
            "ba": "CISO",
            "zone": "PGAE",
            "resource_id": "CISO:PGAE",
            "resource_type": "solar",
            "fuel": "sun",
            "output_mw": "10",
            "output_mwh": "10",
            "data_source": "eia923",
        }),
    );
    let enrich = |rec: &BronzeRecord| {
        let silver = Normalizer::default().normalize(rec).unwrap();
        Enricher::new(Arc::new(StaticReferenceTable::new())).apply(silver, None, Utc::now())
    };
    agg.aggregate(&enrich(&load), five).unwrap();
    let err = agg.aggregate(&enrich(&generation), five).unwrap_err();
    assert!(matches!(err, PipelineError::AggregationConflict { .. }));
    assert_eq!(agg.snapshot()[0].trade_count(), 1);
}

#[test]
fn rows_carry_the_conflict_key_and_increasing_created_at() {
    let agg = Aggregator::default();
    let five = IntervalSize::FIVE_MINUTES;
    let mut last = None;
    for i in 0..20 {
        let upd = agg
            .aggregate(&gold("N", T0 + i, 100 + i, &format!("r{i}")), five)
            .unwrap()
            .unwrap();
        assert_eq!(upd.row.interval_minutes, 5);
        assert_eq!(upd.row.trade_count, u64::try_from(i + 1).unwrap());
        if let Some(prev) = last {
            assert!(upd.row.created_at > prev);
        }
        last = Some(upd.row.created_at);
    }
}

#[test]
fn eviction_drops_old_buckets_only() {
    let agg = Aggregator::new(BucketAlignment::Utc);
    let five = IntervalSize::FIVE_MINUTES;
    agg.aggregate(&gold("N", T0, 100, "a"), five).unwrap();
    agg.aggregate(&gold("N", T0 + 600, 100, "b"), five).unwrap();
    let removed = agg.evict_before(DateTime::<Utc>::from_timestamp(T0 + 300, 0).unwrap());
    assert_eq!(removed, 1);
    assert_eq!(agg.len(), 1);
}

#[test]
fn retention_is_measured_per_series() {
    let agg = Aggregator::default();
    let five = IntervalSize::FIVE_MINUTES;
    for i in 0..24 {
        agg.aggregate(&gold("A", T0 + i * 300, 100, &format!("a{i}")), five)
            .unwrap();
    }
    // A quiet series whose only bucket is old relative to the busy one.
    agg.aggregate(&gold("B", T0, 100, "b0"), five).unwrap();

    let removed = agg.evict_older_than(std::time::Duration::from_secs(3600));
    assert_eq!(removed, 11);
    assert_eq!(agg.len(), 14);
    assert_eq!(
        agg.watermark("default", "A:DAM"),
        DateTime::<Utc>::from_timestamp(T0 + 23 * 300, 0)
    );
    assert_eq!(
        agg.evicted_before("default", "A:DAM"),
        DateTime::<Utc>::from_timestamp(T0 + 23 * 300 - 3600, 0)
    );

    let late = agg
        .aggregate(&gold("A", T0 + 60, 100, "late"), five)
        .unwrap_err();
    assert_eq!(late.field(), Some("timestamp"));
    agg.aggregate(&gold("B", T0 + 60, 100, "b1"), five)
        .unwrap()
        .unwrap();
}

#[test]
fn ledger_records_pass_through() {
    let rec = BronzeRecord::from_json(
        "emission_factors",
        "epa",
        json!({
            "fuel": "coal",
            "scope": "scope1",
            "kg_co2e_per_mwh": "950",
            "source": "epa",
            "effective_date": "2024-01-01",
        }),
    );
    let silver = Normalizer::default().normalize(&rec).unwrap();
    let gold = Enricher::new(Arc::new(StaticReferenceTable::new())).apply(silver, None, Utc::now());
    let agg = Aggregator::default();
    assert_eq!(agg.aggregate(&gold, IntervalSize::HOURLY).unwrap(), None);
    assert!(agg.is_empty());
}

proptest! {
    #[test]
    fn ohlc_invariants_hold(prices in proptest::collection::vec(-50_000i64..50_000i64, 1..40)) {
        let agg = Aggregator::default();
        let five = IntervalSize::FIVE_MINUTES;
        for (i, cents) in prices.iter().enumerate() {
            let secs = T0 + i64::try_from(i % 300).unwrap();
            agg.aggregate(&gold("N", secs, *cents, &format!("r{i}")), five).unwrap();
        }
        let windows = agg.snapshot();
        prop_assert_eq!(windows.len(), 1);
        let w = &windows[0];
        prop_assert!(w.low() <= w.open() && w.open() <= w.high());
        prop_assert!(w.low() <= w.close() && w.close() <= w.high());
        prop_assert_eq!(w.open(), Decimal::new(prices[0], 2));
        prop_assert_eq!(w.close(), Decimal::new(*prices.last().unwrap(), 2));
        prop_assert_eq!(w.trade_count(), prices.len() as u64);
        prop_assert_eq!(w.volume(), Decimal::new(15, 1) * Decimal::from(prices.len()));
    }

    #[test]
    fn replay_does_not_change_accumulators(
        prices in proptest::collection::vec(0i64..10_000i64, 1..20),
        replays in proptest::collection::vec(0usize..20, 0..20),
    ) {
        let agg = Aggregator::default();
        let five = IntervalSize::FIVE_MINUTES;
        let records: Vec<GoldRecord> = prices
            .iter()
            .enumerate()
            .map(|(i, cents)| gold("N", T0, *cents, &format!("r{i}")))
            .collect();
        for r in &records {
            agg.aggregate(r, five).unwrap();
        }
        let before = agg.snapshot()[0].clone();
        for idx in replays {
            agg.aggregate(&records[idx % records.len()], five).unwrap();
        }
        let after = &agg.snapshot()[0];
        prop_assert_eq!(after.volume(), before.volume());
        prop_assert_eq!(after.trade_count(), before.trade_count());
        prop_assert_eq!(after.close(), before.close());
    }
}
