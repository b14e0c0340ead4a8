//! Augmented Dickey-Fuller stationarity test on a spread series.
//!
//! Regresses the first difference on the lagged level, an intercept, and a
//! configured number of lagged differences, then maps the t-statistic on the
//! lagged-level coefficient to an approximate p-value by linear interpolation
//! over the asymptotic constant-case Dickey-Fuller quantiles.

use super::ols;
use serde::{Deserialize, Serialize};

/// Asymptotic quantiles of the Dickey-Fuller tau distribution (constant, no
/// trend), as (statistic, p) pairs in ascending statistic order.
const TAU_QUANTILES: [(f64, f64); 11] = [
    (-3.43, 0.01),
    (-3.12, 0.025),
    (-2.86, 0.05),
    (-2.57, 0.10),
    (-2.18, 0.25),
    (-1.57, 0.50),
    (-0.94, 0.75),
    (-0.44, 0.90),
    (-0.07, 0.95),
    (0.23, 0.975),
    (0.60, 0.99),
];

/// Result of one ADF regression.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct AdfResult {
    /// t-statistic on the lagged-level coefficient.
    pub statistic: f64,
    /// Approximate p-value, clamped to [0.01, 0.99].
    pub pvalue: f64,
    /// Lagged differences included in the regression.
    pub lags: usize,
    /// Observations used after differencing and lagging.
    pub nobs: usize,
}

/// Run the ADF regression on `series` with `lags` lagged differences.
///
/// Returns `None` when the series is too short for the requested lag order or
/// the regression is degenerate (constant series, zero residual variance).
pub fn adf_test(series: &[f64], lags: usize) -> Option<AdfResult> {
    let n = series.len();
    // Need nobs = n - 1 - lags observations for k = lags + 2 coefficients,
    // with residual degrees of freedom left over.
    if n < lags + 2 || n - 1 - lags <= lags + 2 {
        return None;
    }

    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();

    let mut x = Vec::with_capacity(diffs.len() - lags);
    let mut y = Vec::with_capacity(diffs.len() - lags);
    for t in lags..diffs.len() {
        let mut row = Vec::with_capacity(lags + 2);
        row.push(1.0);
        row.push(series[t]);
        for lag in 1..=lags {
            row.push(diffs[t - lag]);
        }
        x.push(row);
        y.push(diffs[t]);
    }

    let fit = ols::fit(&x, &y)?;
    let se = fit.stderr[1];
    if !se.is_finite() || se <= 0.0 {
        return None;
    }
    let statistic = fit.coefs[1] / se;
    if !statistic.is_finite() {
        return None;
    }

    Some(AdfResult {
        statistic,
        pvalue: interpolate_pvalue(statistic),
        lags,
        nobs: y.len(),
    })
}

/// Piecewise-linear interpolation over [`TAU_QUANTILES`], clamped at the ends.
fn interpolate_pvalue(statistic: f64) -> f64 {
    let (first_tau, first_p) = TAU_QUANTILES[0];
    if statistic <= first_tau {
        return first_p;
    }
    let (last_tau, last_p) = TAU_QUANTILES[TAU_QUANTILES.len() - 1];
    if statistic >= last_tau {
        return last_p;
    }

    for pair in TAU_QUANTILES.windows(2) {
        let (lo_tau, lo_p) = pair[0];
        let (hi_tau, hi_p) = pair[1];
        if statistic <= hi_tau {
            let fraction = (statistic - lo_tau) / (hi_tau - lo_tau);
            return lo_p + fraction * (hi_p - lo_p);
        }
    }
    last_p
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    #[test]
    fn test_pvalue_interpolation_bounds() {
        assert_eq!(interpolate_pvalue(-10.0), 0.01);
        assert_eq!(interpolate_pvalue(5.0), 0.99);

        // Exactly on a table point
        assert!((interpolate_pvalue(-2.86) - 0.05).abs() < 1e-12);
        // Midway between -2.86 (0.05) and -2.57 (0.10)
        let mid = interpolate_pvalue(-2.715);
        assert!((mid - 0.075).abs() < 1e-3);
    }

    #[test]
    fn test_mean_reverting_series_reports_stationary() {
        // AR(1) with phi = 0.2 reverts hard; the lagged-level coefficient
        // estimates phi - 1 with a large-magnitude t-statistic.
        let mut rng = StdRng::seed_from_u64(42);
        let mut series = vec![0.0f64];
        for _ in 0..200 {
            let noise: f64 = rng.random_range(-1.0..1.0);
            let prev = *series.last().unwrap();
            series.push(0.2 * prev + noise);
        }

        let result = adf_test(&series, 1).unwrap();
        assert!(result.statistic < -5.0, "statistic {}", result.statistic);
        assert!(result.pvalue <= 0.0100001, "pvalue {}", result.pvalue);
    }

    #[test]
    fn test_drifting_random_walk_reports_nonstationary() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut series = vec![0.0f64];
        for _ in 0..200 {
            let noise: f64 = rng.random_range(-1.0..1.0);
            let prev = *series.last().unwrap();
            series.push(prev + 0.1 + noise);
        }

        let result = adf_test(&series, 1).unwrap();
        assert!(result.pvalue > 0.10, "pvalue {}", result.pvalue);
    }

    #[test]
    fn test_too_short_series_rejected() {
        let series: Vec<f64> = (0..6).map(|i| i as f64).collect();
        assert!(adf_test(&series, 2).is_none());
    }

    #[test]
    fn test_constant_series_degenerate() {
        let series = vec![1.0; 50];
        assert!(adf_test(&series, 1).is_none());
    }
}
