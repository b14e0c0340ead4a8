use crate::event::Timeframe;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-tick ingestion failures.
///
/// These are local and non-fatal: one bad tick never halts the pipeline for
/// other symbols. The caller decides whether to log or drop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Error)]
pub enum IngestionError {
    #[error("late arrival: tick bucket precedes the open bar for {symbol}@{timeframe}")]
    LateArrival { symbol: String, timeframe: Timeframe },

    #[error("malformed tick: {0}")]
    MalformedTick(String),

    #[error(
        "clock skew: tick timestamp {tick_ms}ms jumps beyond the sane bound from the \
         last observed tick at {last_tick_ms}ms"
    )]
    ClockSkew { tick_ms: i64, last_tick_ms: i64 },
}

impl IngestionError {
    /// Clock skew is treated as a malformed tick for propagation purposes.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            IngestionError::MalformedTick(_) | IngestionError::ClockSkew { .. }
        )
    }
}

/// Alert rule registration failures.
///
/// Rejected at registration time; no event ever fires for an invalid rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Error)]
pub enum AlertError {
    #[error("invalid rule expression: {0}")]
    InvalidRuleExpression(String),

    #[error("rule references untracked pair: {0}")]
    UnknownPair(String),
}

/// Structural configuration errors, fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Error)]
pub enum ConfigError {
    #[error("timeframe set is empty")]
    NoTimeframes,

    #[error("zero-length timeframe")]
    ZeroTimeframe,

    #[error("rolling window capacity must be > 0")]
    ZeroWindowCapacity,

    #[error("minimum sample count {min_samples} exceeds window capacity {capacity}")]
    MinSamplesExceedsCapacity { min_samples: usize, capacity: usize },

    #[error("minimum sample count must be >= 3 for regression, got {0}")]
    MinSamplesTooSmall(usize),

    #[error("ADF minimum sample count {adf_min} is below the general minimum {min_samples}")]
    AdfMinBelowGeneralMin { adf_min: usize, min_samples: usize },

    #[error("ADF minimum sample count {adf_min} leaves no observations for {adf_lags} lags")]
    AdfMinTooSmallForLags { adf_min: usize, adf_lags: usize },

    #[error("{0} cadence must be > 0")]
    ZeroCadence(&'static str),

    #[error("tracked pair {pair} uses timeframe {timeframe} outside the configured set")]
    PairTimeframeNotConfigured { pair: String, timeframe: Timeframe },

    #[error("tracked pair {0} has identical legs")]
    DegeneratePair(String),

    #[error("invalid startup alert rule: {0}")]
    InvalidStartupRule(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}
