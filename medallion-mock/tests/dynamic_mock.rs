use chrono::{DateTime, TimeDelta, Utc};
use medallion_core::{
    DataType, PipelineError, ReferenceEntry, ReferenceKey, ReferenceSource, SummaryRow,
    SummarySink,
};
use rust_decimal::Decimal;
use medallion_mock::fixtures;
use medallion_mock::{DynamicReferenceSource, InMemorySummarySink, MockBehavior};

fn key(instrument: &str) -> ReferenceKey {
    ReferenceKey {
        instrument_id: instrument.to_string(),
        region: None,
        at: Utc::now(),
        data_type: DataType::LmpDam,
    }
}

#[tokio::test]
async fn falls_back_to_the_table() {
    let (source, controller) =
        DynamicReferenceSource::new_with_controller("ref", fixtures::reference_table());
    let hit = source.lookup(&key("TH_NP15_GEN-APND")).await.unwrap();
    assert!(hit.is_some_and(|e| e.programs.contains("EDAM")));
    let miss = source.lookup(&key("UNKNOWN")).await.unwrap();
    assert!(miss.is_none());
    assert_eq!(controller.lookup_count().await, 2);
}

#[tokio::test]
async fn rules_override_the_table() {
    let (source, controller) =
        DynamicReferenceSource::new_with_controller("ref", fixtures::reference_table());
    controller
        .set_behavior(
            "TH_NP15_GEN-APND",
            MockBehavior::Return(Some(ReferenceEntry::new("TH_NP15_GEN-APND"))),
        )
        .await;
    let got = source.lookup(&key("TH_NP15_GEN-APND")).await.unwrap();
    assert!(got.is_some_and(|e| e.programs.is_empty()));

    let err = PipelineError::lookup_unavailable("ref", "down");
    controller
        .set_behavior("TH_NP15_GEN-APND", MockBehavior::Fail(err.clone()))
        .await;
    assert_eq!(source.lookup(&key("TH_NP15_GEN-APND")).await, Err(err));
}

#[tokio::test]
async fn queued_failures_come_first() {
    let (source, controller) =
        DynamicReferenceSource::new_with_controller("ref", fixtures::reference_table());
    controller
        .fail_next(2, PipelineError::lookup_unavailable("ref", "blip"))
        .await;
    assert!(source.lookup(&key("TH_NP15_GEN-APND")).await.is_err());
    assert!(source.lookup(&key("TH_NP15_GEN-APND")).await.is_err());
    assert!(source.lookup(&key("TH_NP15_GEN-APND")).await.is_ok());
}

#[tokio::test]
async fn summary_sink_replaces_on_conflict_key() {
    let sink = InMemorySummarySink::new();
    sink.fail_next(1).await;
    assert!(matches!(
        sink.upsert(&[]).await,
        Err(PipelineError::SinkUnavailable { .. })
    ));
    assert!(sink.upsert(&[]).await.is_ok());
    assert_eq!(sink.upsert_count().await, 1);
    assert!(sink.rows().await.is_empty());
}

fn summary(close: i64, trade_count: u64, created_at: DateTime<Utc>) -> SummaryRow {
    SummaryRow {
        tenant_id: "default".into(),
        instrument_id: "TH_NP15_GEN-APND:DAM".into(),
        interval_start: fixtures::t0(),
        interval_minutes: 5,
        open_price: Decimal::new(40, 0),
        high_price: Decimal::new(close.max(40), 0),
        low_price: Decimal::new(close.min(40), 0),
        close_price: Decimal::new(close, 0),
        volume: Decimal::ONE,
        trade_count,
        metadata: serde_json::json!({}),
        created_at,
    }
}

#[tokio::test]
async fn summary_sink_keeps_the_newest_snapshot() {
    let sink = InMemorySummarySink::new();
    let first = fixtures::t0() + TimeDelta::seconds(10);
    let newer = summary(45, 2, first + TimeDelta::milliseconds(1));
    let stale = summary(40, 1, first);

    sink.upsert(std::slice::from_ref(&newer)).await.unwrap();
    sink.upsert(&[stale]).await.unwrap();
    assert_eq!(sink.upsert_count().await, 2);

    let stored = sink
        .row("default", "TH_NP15_GEN-APND:DAM", fixtures::t0())
        .await
        .unwrap();
    assert_eq!(stored, newer);

    let latest = summary(38, 3, newer.created_at + TimeDelta::milliseconds(1));
    sink.upsert(std::slice::from_ref(&latest)).await.unwrap();
    assert_eq!(sink.rows().await, vec![latest]);
}
