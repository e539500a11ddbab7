use std::time::Duration;

use medallion_governor::{BackoffPolicy, jitter_wait};
use medallion_types::BackoffConfig;
use proptest::prelude::*;

#[test]
fn jitter_wait_within_bounds() {
    let base_ms = 1000;
    let jitter_percent = 10;
    for _ in 0..100 {
        let v = jitter_wait(base_ms, jitter_percent);
        assert!(v >= base_ms);
        assert!(v <= base_ms + (base_ms * u64::from(jitter_percent)) / 100);
    }
}

#[test]
fn default_schedule_doubles_then_caps() {
    let policy = BackoffPolicy::new(BackoffConfig {
        jitter_percent: 0,
        ..BackoffConfig::default()
    });
    let delays: Vec<Duration> = (0..10).map(|n| policy.delay_for(n)).collect();
    assert_eq!(delays[0], Duration::from_millis(100));
    assert_eq!(delays[1], Duration::from_millis(200));
    assert_eq!(delays[2], Duration::from_millis(400));
    assert_eq!(delays[9], Duration::from_millis(10_000));
}

fn config() -> impl Strategy<Value = BackoffConfig> {
    (0u64..5_000, 0u64..60_000, 2u32..5, 0u8..=100, 1u32..8).prop_map(
        |(base, extra, factor, jitter, attempts)| BackoffConfig {
            base_delay_ms: base,
            max_delay_ms: base + extra,
            factor,
            jitter_percent: jitter,
            max_attempts: attempts,
        },
    )
}

proptest! {
    #[test]
    fn delays_stay_within_bounds_and_cap(cfg in config(), retry in 0u32..20) {
        prop_assert!(cfg.validate().is_ok());
        let policy = BackoffPolicy::new(cfg);
        let (lo, hi) = policy.bounds(retry);
        let d = policy.delay_for(retry);
        prop_assert!(d >= lo, "{d:?} < {lo:?}");
        prop_assert!(d <= hi, "{d:?} > {hi:?}");
        prop_assert!(d <= policy.cap());
    }

    #[test]
    fn sampled_schedule_is_non_decreasing(cfg in config()) {
        let policy = BackoffPolicy::new(cfg);
        let mut prev = Duration::ZERO;
        for retry in 0..16 {
            let d = policy.delay_for(retry);
            prop_assert!(d >= prev, "retry {retry}: {d:?} < {prev:?}");
            prev = d;
        }
    }
}
