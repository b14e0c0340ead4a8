//! Pipeline wiring: sole-writer ingestion, the analytics worker, and the
//! non-blocking query surface.
//!
//! Ingestion resamples on the producer side (`&mut self` makes the single
//! writer a compile-time property) and hands completed bars to the analytics
//! worker over an ordered channel. The worker exclusively owns every
//! `PairWindow` and the armed-rule table, so per-pair updates are serialized
//! by construction. Readers only ever see immutable published artifacts:
//! completed bars, `Arc`ed snapshots, and appended alert events.

use crate::{
    alert::{AlertEngine, AlertEvent, AlertRuleSpec},
    analytics::{AnalyticsParams, AnalyticsSnapshot, PairAnalytics},
    config::EngineConfig,
    error::{AlertError, ConfigError, IngestionError},
    event::{Bar, PairId, Tick, Timeframe},
    persist::PersistLog,
    resample::{IngestReport, Resampler},
    window::PairWindow,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use smol_str::SmolStr;
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// Buffer depth for each pair's snapshot broadcast channel.
const SNAPSHOT_BROADCAST_BUFFER: usize = 256;

enum WorkerMsg {
    Bar(Bar),
    RegisterRule {
        spec: AlertRuleSpec,
        ack: oneshot::Sender<Result<u64, AlertError>>,
    },
    Shutdown,
}

/// State published for concurrent readers. Writers hold the locks only long
/// enough to swap in a new immutable artifact.
struct SharedState {
    bar_history: usize,
    bars: RwLock<FnvHashMap<(SmolStr, Timeframe), VecDeque<Bar>>>,
    latest: RwLock<FnvHashMap<PairId, Arc<AnalyticsSnapshot>>>,
    alerts: RwLock<FnvHashMap<PairId, Vec<Arc<AlertEvent>>>>,
    snapshot_tx: FnvHashMap<PairId, broadcast::Sender<Arc<AnalyticsSnapshot>>>,
}

/// The resampling + analytics + alerting pipeline.
///
/// `feed_tick` is the sole ingress; queries go through [`EngineHandle`]
/// clones, which remain valid until the engine is shut down.
pub struct PairsEngine {
    resampler: Resampler,
    shared: Arc<SharedState>,
    worker_tx: mpsc::UnboundedSender<WorkerMsg>,
    worker: tokio::task::JoinHandle<()>,
    sink: Arc<dyn PersistLog>,
}

impl PairsEngine {
    /// Validate the configuration and spawn the analytics worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: EngineConfig, sink: Arc<dyn PersistLog>) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut snapshot_tx = FnvHashMap::default();
        let mut alerts = FnvHashMap::default();
        let mut pair_index: FnvHashMap<(SmolStr, Timeframe), Vec<PairId>> = FnvHashMap::default();
        let mut analytics: FnvHashMap<PairId, PairAnalytics> = FnvHashMap::default();

        let params = AnalyticsParams {
            adf_lags: config.adf_lags,
            adf_min_samples: config.adf_min_samples,
            adf_every: config.adf_every,
        };

        for pair in &config.pairs {
            let pair_id = pair.id();
            let (tx, _rx) = broadcast::channel(SNAPSHOT_BROADCAST_BUFFER);
            snapshot_tx.insert(pair_id.clone(), tx);
            alerts.insert(pair_id.clone(), Vec::new());

            for symbol in [&pair.symbol_a, &pair.symbol_b] {
                pair_index
                    .entry((symbol.clone(), pair.timeframe))
                    .or_default()
                    .push(pair_id.clone());
            }

            analytics.insert(
                pair_id.clone(),
                PairAnalytics::new(
                    pair_id,
                    pair.symbol_a.clone(),
                    PairWindow::new(
                        config.window_capacity,
                        config.min_samples,
                        config.recompute_every,
                    ),
                    params,
                ),
            );
        }

        let mut alert_engine = AlertEngine::new();
        for rule in &config.rules {
            if !snapshot_tx.contains_key(&rule.pair.id()) {
                return Err(ConfigError::InvalidStartupRule(format!(
                    "rule references untracked pair {}",
                    rule.pair.id()
                )));
            }
            alert_engine
                .register_rule(rule)
                .map_err(|err| ConfigError::InvalidStartupRule(err.to_string()))?;
        }

        let shared = Arc::new(SharedState {
            bar_history: config.bar_history,
            bars: RwLock::new(FnvHashMap::default()),
            latest: RwLock::new(FnvHashMap::default()),
            alerts: RwLock::new(alerts),
            snapshot_tx,
        });

        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(
            worker_rx,
            Arc::clone(&shared),
            analytics,
            pair_index,
            alert_engine,
            Arc::clone(&sink),
        ));

        Ok(Self {
            resampler: Resampler::new(config.timeframes, config.max_clock_skew_ms),
            shared,
            worker_tx,
            worker,
            sink,
        })
    }

    /// Sole ingress from the feed collaborator.
    ///
    /// `Err` rejects the tick wholesale (malformed); `Ok` reports the
    /// completed bars and any per-timeframe rejections. Either way the
    /// pipeline keeps running for every other symbol.
    pub fn feed_tick(&mut self, tick: &Tick) -> Result<IngestReport, IngestionError> {
        let report = self.resampler.ingest(tick)?;

        for bar in &report.completed {
            self.publish_bar(bar);
            self.sink.persist_bar(bar);
            if self.worker_tx.send(WorkerMsg::Bar(bar.clone())).is_err() {
                warn!("analytics worker gone, dropping completed bar");
            }
        }
        for (timeframe, reason) in &report.rejections {
            debug!(symbol = %tick.symbol, %timeframe, %reason, "tick rejected");
        }
        Ok(report)
    }

    fn publish_bar(&self, bar: &Bar) {
        let mut bars = self.shared.bars.write();
        let history = bars
            .entry((bar.symbol.clone(), bar.timeframe))
            .or_insert_with(|| VecDeque::with_capacity(self.shared.bar_history));
        if history.len() == self.shared.bar_history {
            history.pop_front();
        }
        history.push_back(bar.clone());
    }

    /// Cloneable, non-blocking query surface.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
            worker_tx: self.worker_tx.clone(),
        }
    }

    /// Stop the pipeline, letting the in-flight bar/snapshot computation
    /// finish. Queued-but-unprocessed bars after the shutdown marker are
    /// discarded without exposing partial state.
    pub async fn shutdown(self) {
        let _ = self.worker_tx.send(WorkerMsg::Shutdown);
        if let Err(err) = self.worker.await {
            warn!(%err, "analytics worker did not shut down cleanly");
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<WorkerMsg>,
    shared: Arc<SharedState>,
    mut analytics: FnvHashMap<PairId, PairAnalytics>,
    pair_index: FnvHashMap<(SmolStr, Timeframe), Vec<PairId>>,
    mut alert_engine: AlertEngine,
    sink: Arc<dyn PersistLog>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            WorkerMsg::Bar(bar) => {
                let Some(pair_ids) = pair_index.get(&(bar.symbol.clone(), bar.timeframe)) else {
                    continue;
                };
                for pair_id in pair_ids {
                    let Some(pair_analytics) = analytics.get_mut(pair_id) else {
                        continue;
                    };
                    let leg = pair_analytics.leg_of(&bar.symbol);
                    let snapshot = Arc::new(pair_analytics.on_bar_completed(
                        leg,
                        bar.close,
                        bar.bucket_end,
                    ));

                    sink.persist_snapshot(&snapshot);
                    shared
                        .latest
                        .write()
                        .insert(pair_id.clone(), Arc::clone(&snapshot));
                    if let Some(tx) = shared.snapshot_tx.get(pair_id) {
                        // Send errors just mean no subscriber is listening.
                        let _ = tx.send(Arc::clone(&snapshot));
                    }

                    for event in alert_engine.evaluate(&snapshot) {
                        sink.persist_alert(&event);
                        let event = Arc::new(event);
                        shared
                            .alerts
                            .write()
                            .entry(pair_id.clone())
                            .or_default()
                            .push(event);
                    }
                }
            }
            WorkerMsg::RegisterRule { spec, ack } => {
                let result = if shared.snapshot_tx.contains_key(&spec.pair.id()) {
                    alert_engine.register_rule(&spec)
                } else {
                    Err(AlertError::UnknownPair(spec.pair.id().to_string()))
                };
                let _ = ack.send(result);
            }
            WorkerMsg::Shutdown => break,
        }
    }
    debug!("analytics worker stopped");
}

/// Point-in-time, non-blocking reads of the last published artifacts, plus
/// runtime rule registration.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<SharedState>,
    worker_tx: mpsc::UnboundedSender<WorkerMsg>,
}

impl EngineHandle {
    /// Completed bars for a symbol/timeframe whose bucket starts fall in
    /// `[from, to)`, oldest first.
    pub fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<Bar> {
        let bars = self.shared.bars.read();
        bars.get(&(SmolStr::new(symbol), timeframe))
            .map(|history| {
                history
                    .iter()
                    .filter(|bar| bar.bucket_start >= from && bar.bucket_start < to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Latest published snapshot for a tracked pair.
    pub fn get_latest_snapshot(&self, pair_id: &PairId) -> Option<Arc<AnalyticsSnapshot>> {
        self.shared.latest.read().get(pair_id).cloned()
    }

    /// Live, cancellable sequence of snapshots for a tracked pair.
    ///
    /// Slow subscribers observe `Lagged` items rather than blocking the
    /// pipeline. Returns `None` for untracked pairs.
    pub fn subscribe_snapshots(
        &self,
        pair_id: &PairId,
    ) -> Option<BroadcastStream<Arc<AnalyticsSnapshot>>> {
        self.shared
            .snapshot_tx
            .get(pair_id)
            .map(|tx| BroadcastStream::new(tx.subscribe()))
    }

    /// Alert events recorded for a tracked pair, in emission order.
    pub fn get_alert_history(&self, pair_id: &PairId) -> Vec<Arc<AlertEvent>> {
        self.shared
            .alerts
            .read()
            .get(pair_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Register a rule against the live engine.
    pub async fn register_rule(&self, spec: AlertRuleSpec) -> Result<u64, AlertError> {
        let (ack, response) = oneshot::channel();
        self.worker_tx
            .send(WorkerMsg::RegisterRule { spec, ack })
            .map_err(|_| AlertError::InvalidRuleExpression("engine is shut down".into()))?;
        response
            .await
            .map_err(|_| AlertError::InvalidRuleExpression("engine is shut down".into()))?
    }
}
