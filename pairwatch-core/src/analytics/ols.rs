//! Ordinary least squares via normal equations.
//!
//! The design matrices here are tiny (intercept + level + a handful of lagged
//! differences), so a dense normal-equation solve with partial pivoting is
//! both sufficient and deterministic.

/// A fitted least-squares regression.
#[derive(Debug, Clone, PartialEq)]
pub struct OlsFit {
    /// Coefficients, one per design-matrix column.
    pub coefs: Vec<f64>,
    /// Standard errors, one per coefficient.
    pub stderr: Vec<f64>,
    /// Residual variance RSS / (n - k).
    pub residual_variance: f64,
    pub nobs: usize,
}

/// Fit `y` on the row-major design matrix `x` (each row one observation).
///
/// Returns `None` when the problem is singular or lacks residual degrees of
/// freedom.
pub fn fit(x: &[Vec<f64>], y: &[f64]) -> Option<OlsFit> {
    let n = y.len();
    if n == 0 || x.len() != n {
        return None;
    }
    let k = x[0].len();
    if k == 0 || n <= k || x.iter().any(|row| row.len() != k) {
        return None;
    }

    // Normal equations: (X'X) b = X'y
    let mut xtx = vec![vec![0.0f64; k]; k];
    let mut xty = vec![0.0f64; k];
    for (row, &yi) in x.iter().zip(y) {
        for i in 0..k {
            xty[i] += row[i] * yi;
            for j in i..k {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 0..k {
        for j in 0..i {
            xtx[i][j] = xtx[j][i];
        }
    }

    let coefs = solve(xtx.clone(), xty)?;

    let mut rss = 0.0;
    for (row, &yi) in x.iter().zip(y) {
        let fitted: f64 = row.iter().zip(&coefs).map(|(xi, bi)| xi * bi).sum();
        let resid = yi - fitted;
        rss += resid * resid;
    }
    let residual_variance = rss / (n - k) as f64;

    // Diagonal of (X'X)^-1 via one unit-vector solve per coefficient.
    let mut stderr = Vec::with_capacity(k);
    for j in 0..k {
        let mut unit = vec![0.0; k];
        unit[j] = 1.0;
        let column = solve(xtx.clone(), unit)?;
        let var_j = residual_variance * column[j];
        if !var_j.is_finite() || var_j < 0.0 {
            return None;
        }
        stderr.push(var_j.sqrt());
    }

    Some(OlsFit {
        coefs,
        stderr,
        residual_variance,
        nobs: n,
    })
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let k = b.len();
    for col in 0..k {
        let pivot_row = (col..k)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot_row][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..k {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for j in col..k {
                a[row][j] -= factor * a[col][j];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; k];
    for row in (0..k).rev() {
        let tail: f64 = ((row + 1)..k).map(|j| a[row][j] * x[j]).sum();
        x[row] = (b[row] - tail) / a[row][row];
        if !x[row].is_finite() {
            return None;
        }
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_line_recovered() {
        // y = 1 + 2x, zero residuals
        let x: Vec<Vec<f64>> = (1..=5).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (1..=5).map(|i| 1.0 + 2.0 * i as f64).collect();

        let fit = fit(&x, &y).unwrap();
        assert!((fit.coefs[0] - 1.0).abs() < 1e-10);
        assert!((fit.coefs[1] - 2.0).abs() < 1e-10);
        assert!(fit.residual_variance < 1e-18);
    }

    #[test]
    fn test_known_standard_errors() {
        // Hand-computed: slope 1.0, intercept 0.2, RSS 4.8, so
        // s^2 = 1.6, se(slope) = sqrt(1.6/10) = 0.4.
        let x: Vec<Vec<f64>> = (1..=5).map(|i| vec![1.0, i as f64]).collect();
        let y = vec![2.0, 1.0, 4.0, 3.0, 6.0];

        let fit = fit(&x, &y).unwrap();
        assert!((fit.coefs[1] - 1.0).abs() < 1e-10);
        assert!((fit.coefs[0] - 0.2).abs() < 1e-10);
        assert!((fit.residual_variance - 1.6).abs() < 1e-10);
        assert!((fit.stderr[1] - 0.4).abs() < 1e-10);
    }

    #[test]
    fn test_singular_design_rejected() {
        // Second column is a multiple of the intercept column.
        let x: Vec<Vec<f64>> = (0..6).map(|_| vec![1.0, 3.0]).collect();
        let y = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert!(fit(&x, &y).is_none());
    }

    #[test]
    fn test_underdetermined_rejected() {
        let x = vec![vec![1.0, 2.0], vec![1.0, 3.0]];
        let y = vec![1.0, 2.0];
        assert!(fit(&x, &y).is_none());
    }
}
