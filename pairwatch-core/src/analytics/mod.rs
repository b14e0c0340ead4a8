//! Pairwise statistical-arbitrage analytics.
//!
//! Recomputes hedge ratio, spread, z-score, and correlation from the current
//! rolling window on every completed bar of either leg, and the ADF
//! stationarity test on its own (cheaper) cadence. Window sizes are tens of
//! samples, so the O(N) spread recomputation per trigger is deterministic and
//! cheap.

use crate::{
    event::PairId,
    window::PairWindow,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::debug;

pub mod adf;
pub mod ols;

/// Variance below this is treated as zero.
const VAR_TOLERANCE: f64 = 1e-10;

/// Outcome classification of a snapshot computation.
///
/// Absence of data is a normal, expected state: errors surface here, never
/// up the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SnapshotStatus {
    Ready,
    InsufficientData,
    SingularRegression,
    NumericOverflow,
}

/// Immutable analytics artifact, one per (pair, bar arrival).
///
/// Fields the contributing window cannot yet support are `None`; no value is
/// ever fabricated or defaulted to zero.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AnalyticsSnapshot {
    pub pair_id: PairId,
    pub time: DateTime<Utc>,
    pub hedge_ratio: Option<f64>,
    pub spread: Option<f64>,
    pub zscore: Option<f64>,
    pub correlation: Option<f64>,
    pub adf_statistic: Option<f64>,
    pub adf_pvalue: Option<f64>,
    pub sample_count: usize,
    pub status: SnapshotStatus,
}

impl AnalyticsSnapshot {
    fn empty(pair_id: PairId, time: DateTime<Utc>, sample_count: usize, status: SnapshotStatus) -> Self {
        Self {
            pair_id,
            time,
            hedge_ratio: None,
            spread: None,
            zscore: None,
            correlation: None,
            adf_statistic: None,
            adf_pvalue: None,
            sample_count,
            status,
        }
    }
}

/// Which side of the pair a completed bar belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    A,
    B,
}

/// Analytics parameters fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct AnalyticsParams {
    pub adf_lags: usize,
    pub adf_min_samples: usize,
    pub adf_every: usize,
}

/// Per-pair analytics state: the rolling window, the latest close per leg,
/// and the ADF cadence.
///
/// Legs with mismatched bar-completion timing are aligned by pairing each
/// completed close with the latest available close of the other leg. This is
/// a deliberate simplification, not interpolation.
#[derive(Debug)]
pub struct PairAnalytics {
    pair_id: PairId,
    symbol_a: SmolStr,
    window: PairWindow,
    params: AnalyticsParams,
    last_log_a: Option<f64>,
    last_log_b: Option<f64>,
    snapshots_since_adf: usize,
    last_adf: Option<adf::AdfResult>,
}

impl PairAnalytics {
    pub fn new(
        pair_id: PairId,
        symbol_a: SmolStr,
        window: PairWindow,
        params: AnalyticsParams,
    ) -> Self {
        Self {
            pair_id,
            symbol_a,
            window,
            params,
            last_log_a: None,
            last_log_b: None,
            snapshots_since_adf: 0,
            last_adf: None,
        }
    }

    /// Map a symbol onto its leg, if it belongs to this pair's leg A.
    pub fn leg_of(&self, symbol: &str) -> Leg {
        if symbol == self.symbol_a { Leg::A } else { Leg::B }
    }

    /// Fold a completed bar close for one leg and recompute the snapshot.
    pub fn on_bar_completed(&mut self, leg: Leg, close: f64, time: DateTime<Utc>) -> AnalyticsSnapshot {
        let log_close = close.ln();
        match leg {
            Leg::A => self.last_log_a = Some(log_close),
            Leg::B => self.last_log_b = Some(log_close),
        }

        if let (Some(a), Some(b)) = (self.last_log_a, self.last_log_b) {
            self.window.push(a, b);
        }

        self.compute(time)
    }

    /// Recompute all statistics from the current window state.
    fn compute(&mut self, time: DateTime<Utc>) -> AnalyticsSnapshot {
        let n = self.window.len();
        if !self.window.is_ready() {
            return AnalyticsSnapshot::empty(
                self.pair_id.clone(),
                time,
                n,
                SnapshotStatus::InsufficientData,
            );
        }

        let stats = self.window.stats();
        let var_b = stats.var_b();
        if !var_b.is_finite() {
            return AnalyticsSnapshot::empty(
                self.pair_id.clone(),
                time,
                n,
                SnapshotStatus::NumericOverflow,
            );
        }
        if var_b <= VAR_TOLERANCE {
            debug!(pair = %self.pair_id, "degenerate leg B variance, singular regression");
            return AnalyticsSnapshot::empty(
                self.pair_id.clone(),
                time,
                n,
                SnapshotStatus::SingularRegression,
            );
        }

        // OLS slope of log A on log B (intercept implicit in the centering).
        let hedge_ratio = stats.cov_ab() / var_b;

        let spreads: Vec<f64> = self
            .window
            .rows()
            .map(|(a, b)| a - hedge_ratio * b)
            .collect();
        let latest_spread = spreads[spreads.len() - 1];

        let spread_mean = spreads.iter().sum::<f64>() / n as f64;
        let spread_var = spreads
            .iter()
            .map(|s| (s - spread_mean) * (s - spread_mean))
            .sum::<f64>()
            / n as f64;
        let spread_std = spread_var.sqrt();

        // Zero spread variance is the degenerate boundary: the latest spread
        // equals the window mean, so the standardized deviation is zero.
        let zscore = if spread_std <= VAR_TOLERANCE {
            0.0
        } else {
            (latest_spread - spread_mean) / spread_std
        };

        let var_a = stats.var_a();
        let correlation = if var_a > VAR_TOLERANCE {
            Some(stats.cov_ab() / (var_a.sqrt() * var_b.sqrt()))
        } else {
            None
        };

        // ADF is the most data-hungry statistic: it needs its own (larger)
        // minimum and recomputes on a fixed cadence, carrying the previous
        // result between recomputes.
        if n >= self.params.adf_min_samples {
            if self.snapshots_since_adf % self.params.adf_every == 0 || self.last_adf.is_none() {
                self.last_adf = adf::adf_test(&spreads, self.params.adf_lags);
            }
            self.snapshots_since_adf += 1;
        } else {
            self.last_adf = None;
            self.snapshots_since_adf = 0;
        }

        let computed = [
            hedge_ratio,
            latest_spread,
            zscore,
            correlation.unwrap_or(0.0),
        ];
        if computed.iter().any(|v| !v.is_finite()) {
            return AnalyticsSnapshot::empty(
                self.pair_id.clone(),
                time,
                n,
                SnapshotStatus::NumericOverflow,
            );
        }

        AnalyticsSnapshot {
            pair_id: self.pair_id.clone(),
            time,
            hedge_ratio: Some(hedge_ratio),
            spread: Some(latest_spread),
            zscore: Some(zscore),
            correlation,
            adf_statistic: self.last_adf.map(|r| r.statistic),
            adf_pvalue: self.last_adf.map(|r| r.pvalue),
            sample_count: n,
            status: SnapshotStatus::Ready,
        }
    }
}
