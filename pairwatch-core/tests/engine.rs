//! End-to-end pipeline tests: ticks in, bars, snapshots, and alerts out
//! through the public engine API.

use chrono::{DateTime, Utc};
use pairwatch_core::{
    AlertField, AlertOp, AlertRuleSpec, ChannelPersist, EngineConfig, NullPersist, PairSpec,
    PairsEngine, PersistEvent, SnapshotStatus, Tick, Timeframe,
};
use smol_str::SmolStr;
use std::{sync::Arc, time::Duration};
use tokio_stream::StreamExt;

fn pair_spec() -> PairSpec {
    PairSpec {
        symbol_a: SmolStr::new("aaa"),
        symbol_b: SmolStr::new("bbb"),
        timeframe: Timeframe::from_secs(1),
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        timeframes: vec![Timeframe::from_secs(1)],
        window_capacity: 30,
        min_samples: 5,
        recompute_every: 16,
        adf_lags: 1,
        adf_min_samples: 12,
        adf_every: 3,
        max_clock_skew_ms: 120_000,
        bar_history: 128,
        pairs: vec![pair_spec()],
        rules: vec![AlertRuleSpec {
            pair: pair_spec(),
            field: AlertField::HedgeRatio,
            op: AlertOp::Gt,
            threshold: 1.2,
        }],
    }
}

fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

/// Legs on exponential tracks with log A = 2 log B: the engine should recover
/// a hedge ratio near 2 once the pair window is warm.
fn feed_square_tracks(engine: &mut PairsEngine, seconds: i64) {
    for s in 0..seconds {
        let x = 0.01 * s as f64;
        let b = x.exp();
        let a = (2.0 * x).exp();
        engine
            .feed_tick(&Tick::new(at(s * 1_000), "bbb", b, 1.0))
            .unwrap();
        engine
            .feed_tick(&Tick::new(at(s * 1_000), "aaa", a, 1.0))
            .unwrap();
    }
}

#[tokio::test]
async fn test_ticks_to_ready_snapshot() {
    let mut engine = PairsEngine::spawn(test_config(), Arc::new(NullPersist)).unwrap();
    let handle = engine.handle();
    let pair_id = pair_spec().id();

    feed_square_tracks(&mut engine, 31);
    engine.shutdown().await;

    let snapshot = handle.get_latest_snapshot(&pair_id).expect("snapshot published");
    assert_eq!(snapshot.status, SnapshotStatus::Ready);
    assert!(snapshot.sample_count >= 12);

    let hedge = snapshot.hedge_ratio.unwrap();
    assert!((hedge - 2.0).abs() < 0.05, "hedge ratio {hedge}");
    assert!(snapshot.correlation.unwrap() > 0.99);
    assert!(snapshot.zscore.unwrap().abs() < 2.0);
    assert!(snapshot.adf_statistic.is_some());
    let pvalue = snapshot.adf_pvalue.unwrap();
    assert!((0.01..=0.99).contains(&pvalue));
}

#[tokio::test]
async fn test_bar_ranges_ordered_and_half_open() {
    let mut engine = PairsEngine::spawn(test_config(), Arc::new(NullPersist)).unwrap();
    let handle = engine.handle();

    feed_square_tracks(&mut engine, 11);
    engine.shutdown().await;

    let bars = handle.get_bars("bbb", Timeframe::from_secs(1), at(2_000), at(6_000));
    assert_eq!(bars.len(), 4);
    assert_eq!(bars[0].bucket_start, at(2_000));
    assert_eq!(bars[3].bucket_start, at(5_000));
    assert!(bars.windows(2).all(|w| w[0].bucket_end == w[1].bucket_start));
    assert!(bars.iter().all(|bar| bar.complete));
}

#[tokio::test]
async fn test_startup_rule_edge_triggers_exactly_once() {
    let mut engine = PairsEngine::spawn(test_config(), Arc::new(NullPersist)).unwrap();
    let handle = engine.handle();
    let pair_id = pair_spec().id();

    // The hedge ratio stays above 1.2 for every Ready snapshot, so the rule
    // crosses upward exactly once over the whole run.
    feed_square_tracks(&mut engine, 31);
    engine.shutdown().await;

    let history = handle.get_alert_history(&pair_id);
    assert_eq!(history.len(), 1, "expected a single edge-triggered event");
    let event = &history[0];
    assert!(event.observed > 1.2);
    assert!(event.message.contains("hedge_ratio > 1.2"));
}

#[tokio::test]
async fn test_subscription_receives_live_snapshots() {
    let mut engine = PairsEngine::spawn(test_config(), Arc::new(NullPersist)).unwrap();
    let handle = engine.handle();
    let pair_id = pair_spec().id();

    let mut stream = handle.subscribe_snapshots(&pair_id).expect("tracked pair");
    assert!(handle.subscribe_snapshots(&pair_spec().id()).is_some());

    feed_square_tracks(&mut engine, 11);

    // Two bars complete per elapsed second, one per leg.
    let mut statuses = Vec::new();
    for _ in 0..10 {
        let item = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("snapshot within timeout")
            .expect("stream open")
            .expect("no lag at this volume");
        statuses.push(item.status);
    }

    // Early snapshots are below the minimum sample count, later ones Ready.
    assert_eq!(statuses[0], SnapshotStatus::InsufficientData);
    assert!(statuses.contains(&SnapshotStatus::Ready));

    // Cancelling is just dropping the stream.
    drop(stream);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_late_ticks_rejected_but_pipeline_continues() {
    let mut engine = PairsEngine::spawn(test_config(), Arc::new(NullPersist)).unwrap();

    feed_square_tracks(&mut engine, 5);

    // Stale timestamp for bbb: rejected per-timeframe, tick accepted wholesale.
    let report = engine
        .feed_tick(&Tick::new(at(1_500), "bbb", 1.0, 1.0))
        .unwrap();
    assert_eq!(report.rejections.len(), 1);
    assert!(report.completed.is_empty());

    // Malformed tick rejected wholesale.
    assert!(engine.feed_tick(&Tick::new(at(10_000), "bbb", -5.0, 1.0)).is_err());

    // The pipeline still resamples fresh ticks afterwards.
    let report = engine
        .feed_tick(&Tick::new(at(5_000), "bbb", 1.05, 1.0))
        .unwrap();
    assert_eq!(report.completed.len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_artifacts_forwarded_to_persistence() {
    let (sink, mut rx) = ChannelPersist::new();
    let mut engine = PairsEngine::spawn(test_config(), Arc::new(sink)).unwrap();

    feed_square_tracks(&mut engine, 11);
    engine.shutdown().await;

    let mut bars = 0;
    let mut snapshots = 0;
    let mut alerts = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            PersistEvent::Bar(bar) => {
                assert!(bar.complete);
                bars += 1;
            }
            PersistEvent::Snapshot(_) => snapshots += 1,
            PersistEvent::Alert(_) => alerts += 1,
        }
    }

    // 10 elapsed seconds, two legs: 20 completed bars, one snapshot per bar.
    assert_eq!(bars, 20);
    assert_eq!(snapshots, 20);
    assert_eq!(alerts, 1);
}
