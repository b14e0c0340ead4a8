//! Rolling window of aligned pair closes with incremental sufficient statistics.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Point-in-time copy of a window's sufficient statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct WindowStats {
    pub n: usize,
    pub sum_a: f64,
    pub sum_b: f64,
    pub sum_aa: f64,
    pub sum_bb: f64,
    pub sum_ab: f64,
}

impl WindowStats {
    pub fn mean_a(&self) -> f64 {
        self.sum_a / self.n as f64
    }

    pub fn mean_b(&self) -> f64 {
        self.sum_b / self.n as f64
    }

    /// Population variance of leg A.
    pub fn var_a(&self) -> f64 {
        let n = self.n as f64;
        self.sum_aa / n - (self.sum_a / n) * (self.sum_a / n)
    }

    /// Population variance of leg B.
    pub fn var_b(&self) -> f64 {
        let n = self.n as f64;
        self.sum_bb / n - (self.sum_b / n) * (self.sum_b / n)
    }

    /// Population covariance of the two legs.
    pub fn cov_ab(&self) -> f64 {
        let n = self.n as f64;
        self.sum_ab / n - (self.sum_a / n) * (self.sum_b / n)
    }
}

/// Fixed-capacity sliding window of the N most recent aligned log-closes for
/// one tracked pair.
///
/// Appends and evictions update the running sums in O(1). Incremental
/// floating-point updates drift over long runs, so the sums are recomputed in
/// full from the ring contents every `recompute_every` evictions.
///
/// Owned exclusively by the analytics worker; mutated only via [`Self::push`].
#[derive(Debug, Clone)]
pub struct PairWindow {
    capacity: usize,
    min_samples: usize,
    recompute_every: usize,
    rows: VecDeque<(f64, f64)>,
    stats: WindowStats,
    evictions: usize,
}

impl PairWindow {
    pub fn new(capacity: usize, min_samples: usize, recompute_every: usize) -> Self {
        Self {
            capacity,
            min_samples,
            recompute_every,
            rows: VecDeque::with_capacity(capacity),
            stats: WindowStats::default(),
            evictions: 0,
        }
    }

    /// Append one aligned observation, evicting the oldest at capacity.
    pub fn push(&mut self, a: f64, b: f64) {
        if self.rows.len() == self.capacity {
            if let Some((old_a, old_b)) = self.rows.pop_front() {
                self.stats.sum_a -= old_a;
                self.stats.sum_b -= old_b;
                self.stats.sum_aa -= old_a * old_a;
                self.stats.sum_bb -= old_b * old_b;
                self.stats.sum_ab -= old_a * old_b;
                self.stats.n -= 1;
                self.evictions += 1;
            }
        }

        self.rows.push_back((a, b));
        self.stats.sum_a += a;
        self.stats.sum_b += b;
        self.stats.sum_aa += a * a;
        self.stats.sum_bb += b * b;
        self.stats.sum_ab += a * b;
        self.stats.n += 1;

        if self.evictions > 0 && self.evictions % self.recompute_every == 0 {
            self.recompute();
        }
    }

    /// Rebuild the running sums from the current ring contents.
    pub fn recompute(&mut self) {
        let mut fresh = WindowStats {
            n: self.rows.len(),
            ..WindowStats::default()
        };
        for &(a, b) in &self.rows {
            fresh.sum_a += a;
            fresh.sum_b += b;
            fresh.sum_aa += a * a;
            fresh.sum_bb += b * b;
            fresh.sum_ab += a * b;
        }
        self.stats = fresh;
    }

    /// True once the window holds at least the configured minimum sample count.
    pub fn is_ready(&self) -> bool {
        self.rows.len() >= self.min_samples
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn stats(&self) -> WindowStats {
        self.stats
    }

    /// Ordered view of the window contents, oldest first.
    pub fn rows(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.rows.iter().copied()
    }

    pub fn latest(&self) -> Option<(f64, f64)> {
        self.rows.back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    #[test]
    fn test_readiness_threshold_distinct_from_capacity() {
        let mut window = PairWindow::new(10, 4, 16);
        for i in 0..3 {
            window.push(i as f64, i as f64);
            assert!(!window.is_ready());
        }
        window.push(3.0, 3.0);
        assert!(window.is_ready());
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn test_eviction_keeps_fixed_capacity() {
        let mut window = PairWindow::new(3, 3, 16);
        for i in 0..5 {
            window.push(i as f64, 2.0 * i as f64);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.latest(), Some((4.0, 8.0)));
        // sum over {2, 3, 4}
        assert!((window.stats().sum_a - 9.0).abs() < 1e-12);
        assert!((window.stats().sum_b - 18.0).abs() < 1e-12);
    }

    #[test]
    fn test_incremental_matches_full_recompute_under_churn() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut window = PairWindow::new(50, 20, 64);

        for _ in 0..5_000 {
            let a = rng.random_range(90.0..110.0f64).ln();
            let b = rng.random_range(40.0..60.0f64).ln();
            window.push(a, b);
        }

        let incremental = window.stats();
        let mut fresh = window.clone();
        fresh.recompute();
        let recomputed = fresh.stats();

        assert_eq!(incremental.n, recomputed.n);
        for (inc, full) in [
            (incremental.sum_a, recomputed.sum_a),
            (incremental.sum_b, recomputed.sum_b),
            (incremental.sum_aa, recomputed.sum_aa),
            (incremental.sum_bb, recomputed.sum_bb),
            (incremental.sum_ab, recomputed.sum_ab),
        ] {
            let denom = full.abs().max(1.0);
            assert!(
                ((inc - full) / denom).abs() < 1e-9,
                "sums drifted: incremental {inc} vs recomputed {full}"
            );
        }
    }

    #[test]
    fn test_stats_moments() {
        let mut window = PairWindow::new(4, 3, 16);
        // a: 1, 2, 3, 4; b = 2a
        for i in 1..=4 {
            window.push(i as f64, 2.0 * i as f64);
        }
        let stats = window.stats();
        assert!((stats.mean_a() - 2.5).abs() < 1e-12);
        assert!((stats.var_a() - 1.25).abs() < 1e-12);
        assert!((stats.var_b() - 5.0).abs() < 1e-12);
        assert!((stats.cov_ab() - 2.5).abs() < 1e-12);
    }
}
