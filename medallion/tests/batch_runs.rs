mod helpers;

use std::time::Duration;

use helpers::{dec, fixed_backoff, harness, harness_with, harness_with_gold, init_tracing};
use medallion::{
    BackoffConfig, BreakerConfig, BreakerState, CancelToken, DataType, ErrorKind, PipelineError,
    RunStatus, Stage,
};
use medallion_core::{DEFAULT_TENANT, context_keys};
use medallion_mock::MockBehavior;
use medallion_mock::fixtures::{self, T0};

const NP15: &str = "TH_NP15_GEN-APND";
const NP15_DAM: &str = "TH_NP15_GEN-APND:DAM";

fn three_prices() -> Vec<medallion::BronzeRecord> {
    vec![
        fixtures::lmp(NP15, T0, "45.67", "r1"),
        fixtures::lmp(NP15, T0 + 60, "46.00", "r2"),
        fixtures::lmp(NP15, T0 + 120, "45.50", "r3"),
    ]
}

#[tokio::test]
async fn three_records_in_one_bucket_produce_ohlc() {
    init_tracing();
    let h = harness();
    let result = h.pipeline.run_batch(three_prices(), "lmp_dam").await;

    assert_eq!(result.status(), RunStatus::Success);
    assert_eq!(result.data_type(), Some("lmp_dam"));
    assert_eq!(result.received(), 3);
    assert_eq!(result.success(), 3);
    assert_eq!(result.gold_records(), 3);
    assert_eq!(result.enrichment_applied(), 3);
    assert_eq!(result.aggregated(), 3);
    assert_eq!(result.retries(), 0);
    assert!(result.reconciles());
    assert!(result.errors().is_empty());

    let row = h
        .summary
        .row(DEFAULT_TENANT, NP15_DAM, fixtures::t0())
        .await
        .expect("row for the bucket");
    assert_eq!(row.open_price, dec("45.67"));
    assert_eq!(row.high_price, dec("46.00"));
    assert_eq!(row.low_price, dec("45.50"));
    assert_eq!(row.close_price, dec("45.50"));
    assert_eq!(row.trade_count, 3);
    assert_eq!(row.volume, dec("3.0"));
    assert_eq!(row.interval_minutes, 5);
    assert_eq!(row.metadata["data_type"], "lmp_dam");
    assert_eq!(row.metadata["last_record"], "r3");
    assert_eq!(h.summary.upsert_count().await, 3);
    assert!(h.dlq.letters().await.is_empty());
}

#[tokio::test]
async fn replaying_a_batch_leaves_accumulators_unchanged() {
    let h = harness();
    h.pipeline.run_batch(three_prices(), "lmp_dam").await;
    let first = h.summary.row(DEFAULT_TENANT, NP15_DAM, fixtures::t0()).await.unwrap();

    let replay = h.pipeline.run_batch(three_prices(), "lmp_dam").await;
    assert_eq!(replay.success(), 3);
    assert_eq!(replay.aggregated(), 0);

    let second = h.summary.row(DEFAULT_TENANT, NP15_DAM, fixtures::t0()).await.unwrap();
    assert_eq!(second.trade_count, 3);
    assert_eq!(second.volume, first.volume);
    assert_eq!(second.close_price, first.close_price);
    assert!(second.created_at > first.created_at);
}

#[tokio::test]
async fn day_ahead_and_real_time_prices_of_one_node_keep_separate_rows() {
    let h = harness();
    let dam = h
        .pipeline
        .run_batch(vec![fixtures::lmp(NP15, T0, "45.67", "dam")], "lmp_dam")
        .await;
    let rtm = h
        .pipeline
        .run_batch(vec![fixtures::lmp_rtm(NP15, T0 + 30, "52.10", "rtm")], "lmp_rtm")
        .await;

    assert_eq!(dam.success(), 1);
    assert_eq!(rtm.success(), 1);
    assert_eq!(dam.dead_lettered() + rtm.dead_lettered(), 0);
    assert!(h.dlq.letters().await.is_empty());
    assert_eq!(h.pipeline.aggregator().len(), 2);

    let day_ahead = h.summary.row(DEFAULT_TENANT, NP15_DAM, fixtures::t0()).await.unwrap();
    assert_eq!(day_ahead.close_price, dec("45.67"));
    assert_eq!(day_ahead.metadata["data_type"], "lmp_dam");
    let real_time = h
        .summary
        .row(DEFAULT_TENANT, "TH_NP15_GEN-APND:RTM", fixtures::t0())
        .await
        .unwrap();
    assert_eq!(real_time.close_price, dec("52.10"));
    assert_eq!(real_time.metadata["data_type"], "lmp_rtm");
}

#[tokio::test]
async fn concurrent_market_runs_never_conflict() {
    let h = harness_with(|b| b.max_concurrent_types(2));
    let dam: Vec<_> = (0..5)
        .map(|i| fixtures::lmp(NP15, T0 + i, "40.00", &format!("d{i}")))
        .collect();
    let rtm: Vec<_> = (0..5)
        .map(|i| fixtures::lmp_rtm(NP15, T0 + i, "41.00", &format!("r{i}")))
        .collect();
    let results = h
        .pipeline
        .run_batches(vec![("lmp_dam".to_string(), dam), ("lmp_rtm".to_string(), rtm)])
        .await;

    assert!(results.iter().all(|r| r.success() == 5 && r.dead_lettered() == 0));
    assert_eq!(h.pipeline.aggregator().len(), 2);
}

#[tokio::test]
async fn windows_behind_the_retention_horizon_are_evicted() {
    let h = harness_with(|b| b.window_retention(Some(Duration::from_secs(3600))));
    let first = vec![
        fixtures::lmp(NP15, T0, "45.67", "a"),
        fixtures::lmp(NP15, T0 + 7200, "47.00", "b"),
    ];
    assert_eq!(h.pipeline.run_batch(first, "lmp_dam").await.success(), 2);
    assert_eq!(h.pipeline.aggregator().len(), 1);
    assert_eq!(
        h.pipeline.aggregator().evicted_before(DEFAULT_TENANT, NP15_DAM),
        Some(fixtures::t0() + chrono::Duration::hours(1))
    );

    let late = h
        .pipeline
        .run_batch(vec![fixtures::lmp(NP15, T0 + 60, "44.00", "late")], "lmp_dam")
        .await;
    assert_eq!(late.dead_lettered(), 1);
    assert_eq!(late.errors()[0].stage, Stage::Aggregate);
    assert_eq!(late.errors()[0].error_kind, ErrorKind::Validation);

    // The published row for the evicted bucket is left as it was.
    let row = h.summary.row(DEFAULT_TENANT, NP15_DAM, fixtures::t0()).await.unwrap();
    assert_eq!(row.trade_count, 1);
    assert_eq!(row.close_price, dec("45.67"));
}

#[tokio::test]
async fn absent_reference_data_enriches_with_no_match() {
    let h = harness_with_gold();
    let records = vec![
        fixtures::lmp(NP15, T0, "45.67", "known"),
        fixtures::lmp("UNLISTED_NODE", T0, "45.67", "unknown"),
    ];
    let result = h.pipeline.run_batch(records, "lmp_dam").await;
    assert_eq!(result.success(), 2);
    assert_eq!(result.gold_records(), 2);
    assert_eq!(result.enrichment_applied(), 1);

    let published = h.gold.published().await;
    assert_eq!(published.len(), 2);
    let known = published[0].context();
    assert_eq!(known.flag(context_keys::PROGRAM_ELIGIBLE), Some(true));
    let unknown = published[1].context();
    assert!(!unknown.matched());
    assert!(unknown.is_no_match(context_keys::PROGRAM_ELIGIBLE));
}

#[tokio::test]
async fn unsupported_batch_type_dead_letters_every_record() {
    let h = harness();
    let records = vec![
        fixtures::lmp(NP15, T0, "45.67", "a"),
        fixtures::lmp(NP15, T0, "45.68", "b"),
    ];
    let result = h.pipeline.run_batch(records, "gas_prices").await;

    assert_eq!(result.status(), RunStatus::Partial);
    assert_eq!(result.data_type(), Some("gas_prices"));
    assert_eq!(result.dead_lettered(), 2);
    assert_eq!(result.normalization_errors(), 2);
    assert!(result.reconciles());
    let letters = h.dlq.letters().await;
    assert_eq!(letters.len(), 2);
    assert!(
        letters
            .iter()
            .all(|l| l.error_kind == ErrorKind::UnsupportedType && l.stage == Stage::Normalize)
    );
    assert_eq!(h.summary.upsert_count().await, 0);
}

#[tokio::test]
async fn record_tagged_with_another_type_fails_validation() {
    let h = harness();
    let records = vec![
        fixtures::lmp(NP15, T0, "45.67", "a"),
        fixtures::ancillary("NP15", "RU", T0, "12.5"),
    ];
    let result = h.pipeline.run_batch(records, "lmp_dam").await;

    assert_eq!(result.success(), 1);
    assert_eq!(result.dead_lettered(), 1);
    let letter = &result.errors()[0];
    assert_eq!(letter.stage, Stage::Normalize);
    assert_eq!(letter.error_kind, ErrorKind::Validation);
    assert_eq!(letter.data_type, "as_rtm");
    assert!(letter.message.contains("data_type"));
}

#[tokio::test]
async fn invalid_fields_dead_letter_without_retry() {
    let h = harness();
    let records = vec![
        fixtures::lmp(NP15, T0, "45.67", "ok"),
        fixtures::lmp_bad_price(NP15, T0 + 30, "bad"),
    ];
    let result = h.pipeline.run_batch(records, "lmp_dam").await;

    assert_eq!(result.success(), 1);
    assert_eq!(result.normalization_errors(), 1);
    assert_eq!(result.retries(), 0);
    let letter = &result.errors()[0];
    assert_eq!(letter.record_identity.as_str(), "bad");
    assert_eq!(letter.attempt_count, 1);
    assert!(letter.message.contains("lmp_usd_per_mwh"));
    assert_eq!(h.reference.lookup_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn transient_lookup_failures_are_retried() {
    let h = harness();
    h.reference
        .fail_next(2, PipelineError::lookup_unavailable("ref", "connection reset"))
        .await;
    let started = tokio::time::Instant::now();
    let result = h
        .pipeline
        .run_batch(vec![fixtures::lmp(NP15, T0, "45.67", "a")], "lmp_dam")
        .await;

    assert_eq!(result.success(), 1);
    assert_eq!(result.retries(), 2);
    assert_eq!(h.reference.lookup_count().await, 3);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn lookup_outage_past_the_budget_dead_letters_at_enrich() {
    let h = harness();
    h.reference
        .set_behavior(
            NP15,
            MockBehavior::Fail(PipelineError::lookup_unavailable("ref", "down")),
        )
        .await;
    let result = h
        .pipeline
        .run_batch(vec![fixtures::lmp(NP15, T0, "45.67", "a")], "lmp_dam")
        .await;

    assert_eq!(result.dead_lettered(), 1);
    assert_eq!(result.retries(), 3);
    let letters = h.dlq.letters().await;
    assert_eq!(letters[0].stage, Stage::Enrich);
    assert_eq!(letters[0].error_kind, ErrorKind::RetriesExhausted);
    assert_eq!(letters[0].attempt_count, fixed_backoff().max_attempts);
    assert!(h.pipeline.aggregator().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_lookup_times_out_and_is_retried() {
    let h = harness_with(|b| b.stage_timeout(Duration::from_millis(250)));
    h.reference.set_behavior(NP15, MockBehavior::Hang).await;
    let result = h
        .pipeline
        .run_batch(vec![fixtures::lmp(NP15, T0, "45.67", "a")], "lmp_dam")
        .await;

    assert_eq!(result.dead_lettered(), 1);
    let letter = &result.errors()[0];
    assert_eq!(letter.error_kind, ErrorKind::RetriesExhausted);
    assert!(letter.message.contains("timed out"));
    assert_eq!(h.reference.lookup_count().await, 4);
}

#[tokio::test]
async fn open_breaker_fails_records_fast() {
    init_tracing();
    let h = harness_with(|b| {
        b.backoff(BackoffConfig {
            max_attempts: 1,
            ..fixed_backoff()
        })
        .breaker(BreakerConfig {
            failure_rate_threshold: 0.5,
            window: Duration::from_secs(60),
            min_calls: 2,
            cooldown: Duration::from_secs(30),
        })
    });
    h.reference
        .set_behavior(
            NP15,
            MockBehavior::Fail(PipelineError::lookup_unavailable("ref", "down")),
        )
        .await;
    let records = (0..4)
        .map(|i| fixtures::lmp(NP15, T0 + i * 60, "45.67", &format!("r{i}")))
        .collect();
    let result = h.pipeline.run_batch(records, "lmp_dam").await;

    assert_eq!(result.dead_lettered(), 4);
    assert_eq!(h.reference.lookup_count().await, 2);
    let kinds: Vec<ErrorKind> = result.errors().iter().map(|e| e.error_kind).collect();
    assert_eq!(
        kinds,
        vec![
            ErrorKind::RetriesExhausted,
            ErrorKind::RetriesExhausted,
            ErrorKind::CircuitOpen,
            ErrorKind::CircuitOpen,
        ]
    );
    assert_eq!(result.errors()[3].attempt_count, 0);

    let breakers = h.pipeline.governor().breakers();
    assert!(matches!(
        breakers.state(Stage::Enrich, DataType::LmpDam),
        BreakerState::Open { .. }
    ));
    assert_eq!(
        breakers.state(Stage::Enrich, DataType::LmpRtm),
        BreakerState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn summary_sink_outage_is_retried() {
    let h = harness();
    h.summary.fail_next(1).await;
    let result = h
        .pipeline
        .run_batch(vec![fixtures::lmp(NP15, T0, "45.67", "a")], "lmp_dam")
        .await;

    assert_eq!(result.success(), 1);
    assert_eq!(result.retries(), 1);
    assert_eq!(h.summary.upsert_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn publish_failure_keeps_the_window_contribution() {
    let h = harness();
    h.summary
        .fail_always(Some(PipelineError::sink_unavailable("memory-summary", "down")))
        .await;
    let record = fixtures::lmp(NP15, T0, "45.67", "a");
    let result = h.pipeline.run_batch(vec![record.clone()], "lmp_dam").await;

    assert_eq!(result.dead_lettered(), 1);
    assert_eq!(result.aggregated(), 1);
    assert_eq!(result.errors()[0].stage, Stage::Publish);
    assert_eq!(h.pipeline.aggregator().len(), 1);

    // Redelivery after recovery publishes the row without double counting.
    h.summary.fail_always(None).await;
    let retry = h.pipeline.run_batch(vec![record], "lmp_dam").await;
    assert_eq!(retry.success(), 1);
    assert_eq!(retry.aggregated(), 0);
    let row = h.summary.row(DEFAULT_TENANT, NP15_DAM, fixtures::t0()).await.unwrap();
    assert_eq!(row.trade_count, 1);
}

#[tokio::test]
async fn failing_dead_letter_sink_still_accounts_the_record() {
    let h = harness();
    h.dlq
        .fail_always(Some(PipelineError::sink_unavailable("memory-dlq", "down")))
        .await;
    let result = h
        .pipeline
        .run_batch(vec![fixtures::lmp_bad_price(NP15, T0, "bad")], "lmp_dam")
        .await;

    assert_eq!(result.dead_lettered(), 1);
    assert_eq!(result.errors().len(), 1);
    assert!(result.reconciles());
    assert!(h.dlq.letters().await.is_empty());
}

#[tokio::test]
async fn unaggregated_types_publish_gold_only() {
    let h = harness_with_gold();
    let records = vec![
        fixtures::rec("C-1", 2023, "active", None),
        fixtures::rec("C-2", 2023, "retired", Some(2024)),
    ];
    let result = h.pipeline.run_batch(records, "rec_ledger").await;

    assert_eq!(result.success(), 2);
    assert_eq!(result.aggregated(), 0);
    assert_eq!(h.gold.published().await.len(), 2);
    assert_eq!(h.summary.upsert_count().await, 0);
}

#[tokio::test]
async fn default_tenant_is_assigned_to_untagged_records() {
    let h = harness_with(|b| b.default_tenant("acme"));
    let tagged = fixtures::lmp(NP15, T0, "50.00", "t").with_tenant("globex");
    let records = vec![fixtures::lmp(NP15, T0, "45.67", "u"), tagged];
    h.pipeline.run_batch(records, "lmp_dam").await;

    let acme = h.summary.row("acme", NP15_DAM, fixtures::t0()).await.unwrap();
    assert_eq!(acme.close_price, dec("45.67"));
    let globex = h.summary.row("globex", NP15_DAM, fixtures::t0()).await.unwrap();
    assert_eq!(globex.close_price, dec("50.00"));
    assert!(h.summary.row(DEFAULT_TENANT, NP15_DAM, fixtures::t0()).await.is_none());
}

#[tokio::test]
async fn batches_of_several_types_report_in_input_order() {
    let h = harness_with(|b| b.max_concurrent_types(2));
    let results = h
        .pipeline
        .run_batches(vec![
            ("lmp_dam".to_string(), three_prices()),
            (
                "load_demand".to_string(),
                vec![fixtures::load_demand("CISO", "PGAE", T0, "2100.5")],
            ),
            ("unknown".to_string(), vec![fixtures::unsupported("unknown")]),
        ])
        .await;

    let tags: Vec<_> = results.iter().map(|r| r.data_type()).collect();
    assert_eq!(tags, vec![Some("lmp_dam"), Some("load_demand"), Some("unknown")]);
    assert_eq!(results[0].success(), 3);
    assert_eq!(results[1].success(), 1);
    assert_eq!(results[2].dead_lettered(), 1);

    let mut total = results[0].clone();
    for r in &results[1..] {
        total.merge(r.clone());
    }
    assert_eq!(total.received(), 5);
    assert!(total.reconciles());
    assert_eq!(total.status(), RunStatus::Partial);
}

#[tokio::test]
async fn cancelled_batch_dead_letters_unstarted_records() {
    let h = harness();
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = h
        .pipeline
        .run_batch_with_cancel(three_prices(), "lmp_dam", &cancel)
        .await;

    assert_eq!(result.dead_lettered(), 3);
    assert!(result.reconciles());
    assert!(result.errors().iter().all(|e| e.error_kind == ErrorKind::Cancelled
        && e.stage == Stage::Receive
        && e.attempt_count == 0));
    assert_eq!(h.reference.lookup_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_abandons_the_retry() {
    let h = harness();
    h.reference
        .set_behavior(
            NP15,
            MockBehavior::Fail(PipelineError::lookup_unavailable("ref", "down")),
        )
        .await;
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let result = h
        .pipeline
        .run_batch_with_cancel(three_prices(), "lmp_dam", &cancel)
        .await;

    assert_eq!(result.dead_lettered(), 3);
    let first = &result.errors()[0];
    assert_eq!(first.stage, Stage::Enrich);
    assert_eq!(first.error_kind, ErrorKind::Cancelled);
    assert_eq!(first.attempt_count, 2);
    assert!(result.errors()[1..].iter().all(|e| e.stage == Stage::Receive));
}
