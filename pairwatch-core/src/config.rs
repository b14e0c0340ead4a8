use crate::{
    alert::AlertRuleSpec,
    error::ConfigError,
    event::{PairSpec, Timeframe},
};
use serde::{Deserialize, Serialize};

/// Engine configuration, supplied in full at startup.
///
/// Every field that alters computed values is explicit: there are no hidden
/// defaults, and unknown fields fail deserialization.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Timeframes resampled for every observed symbol.
    pub timeframes: Vec<Timeframe>,
    /// Capacity N of each pair's rolling window of aligned closes.
    pub window_capacity: usize,
    /// Samples required before any analytics are produced (<= capacity).
    pub min_samples: usize,
    /// Evictions between full recomputations of the window's running sums.
    pub recompute_every: usize,
    /// Lagged differences included in the ADF regression.
    pub adf_lags: usize,
    /// Samples required before the ADF statistic is produced.
    pub adf_min_samples: usize,
    /// Snapshots between ADF recomputations per pair.
    pub adf_every: usize,
    /// Ticks whose timestamp jumps more than this past the last observed
    /// tick are rejected. Quiet gaps recover on the next consistent tick.
    pub max_clock_skew_ms: u64,
    /// Completed bars retained per (symbol, timeframe) for range queries.
    pub bar_history: usize,
    /// Pairs tracked by the analytics engine.
    pub pairs: Vec<PairSpec>,
    /// Alert rules registered at startup.
    pub rules: Vec<AlertRuleSpec>,
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation, fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeframes.is_empty() {
            return Err(ConfigError::NoTimeframes);
        }
        if self.timeframes.iter().any(|tf| tf.as_millis() == 0) {
            return Err(ConfigError::ZeroTimeframe);
        }
        if self.window_capacity == 0 {
            return Err(ConfigError::ZeroWindowCapacity);
        }
        if self.min_samples < 3 {
            return Err(ConfigError::MinSamplesTooSmall(self.min_samples));
        }
        if self.min_samples > self.window_capacity {
            return Err(ConfigError::MinSamplesExceedsCapacity {
                min_samples: self.min_samples,
                capacity: self.window_capacity,
            });
        }
        if self.adf_min_samples < self.min_samples {
            return Err(ConfigError::AdfMinBelowGeneralMin {
                adf_min: self.adf_min_samples,
                min_samples: self.min_samples,
            });
        }
        // The ADF regression needs intercept + level + lags coefficients, plus
        // residual degrees of freedom.
        if self.adf_min_samples < self.adf_lags + 5 {
            return Err(ConfigError::AdfMinTooSmallForLags {
                adf_min: self.adf_min_samples,
                adf_lags: self.adf_lags,
            });
        }
        if self.recompute_every == 0 {
            return Err(ConfigError::ZeroCadence("recompute_every"));
        }
        if self.adf_every == 0 {
            return Err(ConfigError::ZeroCadence("adf_every"));
        }
        for pair in &self.pairs {
            if pair.symbol_a == pair.symbol_b {
                return Err(ConfigError::DegeneratePair(pair.id().to_string()));
            }
            if !self.timeframes.contains(&pair.timeframe) {
                return Err(ConfigError::PairTimeframeNotConfigured {
                    pair: pair.id().to_string(),
                    timeframe: pair.timeframe,
                });
            }
        }
        Ok(())
    }
}
