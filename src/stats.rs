//! Statistical kernels
//!
//! Small, dependency-light numerics shared by the modeler, the correlation
//! network, the weekly report and the experiment evaluator:
//! - descriptive statistics over complete observations
//! - Pearson correlation with a Student-t p-value
//! - ordinary least squares with Newey-West (HAC) robust covariance
//! - Welch's two-sample t-test
//!
//! Design matrices are tiny (a handful of predictors), so the normal equations
//! are solved with a scaled Gauss-Jordan inverse.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use thiserror::Error;

/// Relative pivot tolerance for the scaled normal-equation inverse
const PIVOT_TOLERANCE: f64 = 1e-10;

/// Numeric failures that callers translate into domain errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StatsError {
    #[error("{n} observations, at least {required} required")]
    TooFewObservations { n: usize, required: usize },

    #[error("design matrix is singular")]
    Singular,

    #[error("response has zero variance")]
    ConstantResponse,

    #[error("samples have zero variance")]
    ZeroVariance,

    #[error("column lengths differ")]
    DimensionMismatch,
}

/// Arithmetic mean; None for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance (n - 1 denominator); None below two observations
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Some(ss / (values.len() - 1) as f64)
}

/// Sample standard deviation; None below two observations
pub fn sample_sd(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Non-null values of a nullable column
pub fn present(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().filter_map(|v| *v).collect()
}

/// Rows where both columns are non-null (pairwise-complete)
pub fn paired(x: &[Option<f64>], y: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .filter_map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) => Some((*a, *b)),
            _ => None,
        })
        .unzip()
}

/// Pearson correlation coefficient.
///
/// None when fewer than two pairs or either side has zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// Two-sided p-value for H0: rho = 0 given r over n pairs
pub fn correlation_p_value(r: f64, n: usize) -> f64 {
    if n <= 2 {
        return 1.0;
    }
    if r.abs() >= 1.0 {
        return 0.0;
    }
    let df = (n - 2) as f64;
    let t = r * (df / (1.0 - r * r)).sqrt();
    two_sided_t_p_value(t, df)
}

/// Two-sided Student-t tail probability.
///
/// A non-finite statistic maps to 0 when infinite and to 1 when NaN.
pub fn two_sided_t_p_value(t: f64, df: f64) -> f64 {
    if t.is_nan() || !(df > 0.0) {
        return 1.0;
    }
    if t.is_infinite() {
        return 0.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.sf(t.abs())).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Standard normal CDF
pub fn standard_normal_cdf(z: f64) -> f64 {
    Normal::standard().cdf(z)
}

/// Newey-West rule-of-thumb truncation lag: floor(4 (n/100)^(2/9))
pub fn newey_west_lags(n: usize) -> usize {
    (4.0 * (n as f64 / 100.0).powf(2.0 / 9.0)).floor() as usize
}

/// Result of an OLS fit with HAC-robust inference
#[derive(Debug, Clone, PartialEq)]
pub struct OlsFit {
    /// Intercept first, then one slope per predictor column
    pub params: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub t_values: Vec<f64>,
    pub p_values: Vec<f64>,
    pub rss: f64,
    pub tss: f64,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub aic: f64,
    pub n: usize,
    pub df_resid: usize,
    pub hac_lags: usize,
}

/// Fit `y = b0 + sum(bj * xj)` by least squares.
///
/// Standard errors use the Newey-West estimator with Bartlett weights and the
/// n / (n - k) small-sample correction; p-values use Student-t with n - k
/// degrees of freedom. Coefficients are plain OLS.
pub fn ols_hac(
    y: &[f64],
    columns: &[Vec<f64>],
    max_lags: Option<usize>,
) -> Result<OlsFit, StatsError> {
    let n = y.len();
    let k = columns.len() + 1;

    if columns.iter().any(|c| c.len() != n) {
        return Err(StatsError::DimensionMismatch);
    }
    if n <= k {
        return Err(StatsError::TooFewObservations {
            n,
            required: k + 1,
        });
    }

    let design = design_matrix(n, columns);
    let xtx = gram(&design);
    let mut xty = vec![0.0; k];
    for (row, &yi) in design.iter().zip(y) {
        for a in 0..k {
            xty[a] += row[a] * yi;
        }
    }

    let xtx_inv = invert_scaled(&xtx).ok_or(StatsError::Singular)?;
    let params = mat_vec(&xtx_inv, &xty);

    let residuals: Vec<f64> = design
        .iter()
        .zip(y)
        .map(|(row, &yi)| yi - dot(row, &params))
        .collect();

    let rss: f64 = residuals.iter().map(|e| e * e).sum();
    let y_mean = mean(y).ok_or(StatsError::TooFewObservations { n, required: k + 1 })?;
    let tss: f64 = y.iter().map(|v| (v - y_mean) * (v - y_mean)).sum();
    if tss <= 0.0 {
        return Err(StatsError::ConstantResponse);
    }

    let df_resid = n - k;
    let r_squared = 1.0 - rss / tss;
    let adj_r_squared = 1.0 - (1.0 - r_squared) * (n - 1) as f64 / df_resid as f64;

    // Gaussian log-likelihood at the MLE of the error variance
    let nf = n as f64;
    let sigma2 = (rss / nf).max(f64::MIN_POSITIVE);
    let llf = -nf / 2.0 * ((2.0 * std::f64::consts::PI).ln() + sigma2.ln() + 1.0);
    let aic = -2.0 * llf + 2.0 * k as f64;

    let hac_lags = max_lags.unwrap_or_else(|| newey_west_lags(n)).min(n - 1);
    let meat = hac_meat(&design, &residuals, hac_lags);
    let correction = nf / df_resid as f64;
    let cov = sandwich(&xtx_inv, &meat);

    let std_errors: Vec<f64> = (0..k)
        .map(|i| (cov[i][i] * correction).max(0.0).sqrt())
        .collect();

    let t_values: Vec<f64> = params
        .iter()
        .zip(&std_errors)
        .map(|(&b, &se)| {
            if se > 0.0 {
                b / se
            } else if b == 0.0 {
                0.0
            } else {
                b.signum() * f64::INFINITY
            }
        })
        .collect();

    let p_values = t_values
        .iter()
        .map(|&t| two_sided_t_p_value(t, df_resid as f64))
        .collect();

    Ok(OlsFit {
        params,
        std_errors,
        t_values,
        p_values,
        rss,
        tss,
        r_squared,
        adj_r_squared,
        aic,
        n,
        df_resid,
        hac_lags,
    })
}

/// Whether an intercept plus `columns` has an invertible normal matrix.
///
/// Uses the same scaled pivot test as [`ols_hac`], so a set accepted here
/// never fails there as singular.
pub fn has_full_rank(columns: &[Vec<f64>]) -> bool {
    let n = columns.first().map_or(0, |c| c.len());
    if n == 0 || columns.iter().any(|c| c.len() != n) {
        return false;
    }
    invert_scaled(&gram(&design_matrix(n, columns))).is_some()
}

/// Welch's unequal-variance t-test of `b` against `a`
#[derive(Debug, Clone, PartialEq)]
pub struct WelchTest {
    pub mean_a: f64,
    pub mean_b: f64,
    /// mean_b - mean_a
    pub difference: f64,
    pub t: f64,
    pub df: f64,
    pub p_value: f64,
}

pub fn welch_t_test(a: &[f64], b: &[f64]) -> Result<WelchTest, StatsError> {
    let required = 2;
    let n = a.len().min(b.len());
    let (var_a, var_b) = match (sample_variance(a), sample_variance(b)) {
        (Some(va), Some(vb)) => (va, vb),
        _ => return Err(StatsError::TooFewObservations { n, required }),
    };
    let (mean_a, mean_b) = match (mean(a), mean(b)) {
        (Some(ma), Some(mb)) => (ma, mb),
        _ => return Err(StatsError::TooFewObservations { n, required }),
    };

    let sa = var_a / a.len() as f64;
    let sb = var_b / b.len() as f64;
    let se2 = sa + sb;
    if se2 <= 0.0 {
        return Err(StatsError::ZeroVariance);
    }

    let difference = mean_b - mean_a;
    let t = difference / se2.sqrt();
    let df = se2 * se2
        / (sa * sa / (a.len() - 1) as f64 + sb * sb / (b.len() - 1) as f64);

    Ok(WelchTest {
        mean_a,
        mean_b,
        difference,
        t,
        df,
        p_value: two_sided_t_p_value(t, df),
    })
}

/// Rows of `[1, x1, .., xk]`
fn design_matrix(n: usize, columns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| {
            let mut row = Vec::with_capacity(columns.len() + 1);
            row.push(1.0);
            row.extend(columns.iter().map(|c| c[i]));
            row
        })
        .collect()
}

/// X'X
fn gram(design: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let k = design.first().map_or(0, |r| r.len());
    let mut xtx = vec![vec![0.0; k]; k];
    for row in design {
        for a in 0..k {
            for b in 0..k {
                xtx[a][b] += row[a] * row[b];
            }
        }
    }
    xtx
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn mat_vec(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    m.iter().map(|row| dot(row, v)).collect()
}

fn mat_mul(a: &[Vec<f64>], b: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = a.len();
    let m = b.first().map_or(0, |r| r.len());
    let mut out = vec![vec![0.0; m]; n];
    for i in 0..n {
        for (l, b_row) in b.iter().enumerate() {
            let a_il = a[i][l];
            for j in 0..m {
                out[i][j] += a_il * b_row[j];
            }
        }
    }
    out
}

fn sandwich(bread: &[Vec<f64>], meat: &[Vec<f64>]) -> Vec<Vec<f64>> {
    mat_mul(&mat_mul(bread, meat), bread)
}

/// Newey-West meat: sum of score outer products plus Bartlett-weighted autocovariances
fn hac_meat(design: &[Vec<f64>], residuals: &[f64], lags: usize) -> Vec<Vec<f64>> {
    let k = design.first().map_or(0, |r| r.len());
    let scores: Vec<Vec<f64>> = design
        .iter()
        .zip(residuals)
        .map(|(row, &e)| row.iter().map(|x| x * e).collect())
        .collect();

    let mut meat = vec![vec![0.0; k]; k];
    for s in &scores {
        for a in 0..k {
            for b in 0..k {
                meat[a][b] += s[a] * s[b];
            }
        }
    }

    for l in 1..=lags {
        let w = 1.0 - l as f64 / (lags as f64 + 1.0);
        for t in l..scores.len() {
            let cur = &scores[t];
            let prev = &scores[t - l];
            for a in 0..k {
                for b in 0..k {
                    meat[a][b] += w * (cur[a] * prev[b] + prev[a] * cur[b]);
                }
            }
        }
    }

    meat
}

/// Invert a symmetric positive semi-definite matrix after unit-diagonal scaling.
///
/// Scaling keeps the pivot tolerance meaningful when predictors live on very
/// different scales (step counts next to ratios).
fn invert_scaled(m: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let k = m.len();
    let mut scale = Vec::with_capacity(k);
    for (i, row) in m.iter().enumerate() {
        if !(row[i] > 0.0) || !row[i].is_finite() {
            return None;
        }
        scale.push(1.0 / row[i].sqrt());
    }

    let scaled: Vec<Vec<f64>> = (0..k)
        .map(|i| (0..k).map(|j| m[i][j] * scale[i] * scale[j]).collect())
        .collect();

    let inv = gauss_jordan(scaled)?;
    Some(
        (0..k)
            .map(|i| (0..k).map(|j| inv[i][j] * scale[i] * scale[j]).collect())
            .collect(),
    )
}

fn gauss_jordan(mut a: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut inv: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot_row][col].abs() < PIVOT_TOLERANCE {
            return None;
        }
        a.swap(col, pivot_row);
        inv.swap(col, pivot_row);

        let p = a[col][col];
        for j in 0..n {
            a[col][j] /= p;
            inv[col][j] /= p;
        }

        let pivot = a[col].clone();
        let pivot_inv = inv[col].clone();
        for i in 0..n {
            if i == col {
                continue;
            }
            let f = a[i][col];
            if f == 0.0 {
                continue;
            }
            for j in 0..n {
                a[i][j] -= f * pivot[j];
                inv[i][j] -= f * pivot_inv[j];
            }
        }
    }

    Some(inv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptives() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&v).unwrap() - 5.0).abs() < 1e-12);
        // Sample variance of the classic example: 32 / 7
        assert!((sample_variance(&v).unwrap() - 32.0 / 7.0).abs() < 1e-12);
        assert!(sample_sd(&[1.0]).is_none());
        assert!(mean(&[]).is_none());
    }

    #[test]
    fn test_paired_drops_incomplete_rows() {
        let x = [Some(1.0), None, Some(3.0), Some(4.0)];
        let y = [Some(2.0), Some(5.0), None, Some(8.0)];
        let (a, b) = paired(&x, &y);
        assert_eq!(a, vec![1.0, 4.0]);
        assert_eq!(b, vec![2.0, 8.0]);
    }

    #[test]
    fn test_pearson_symmetry_and_bounds() {
        let x = [1.0, 2.0, 3.5, 4.0, 6.0, 7.5];
        let y = [2.1, 3.9, 6.2, 8.1, 11.0, 16.0];
        let rxy = pearson(&x, &y).unwrap();
        let ryx = pearson(&y, &x).unwrap();
        assert_eq!(rxy, ryx);
        assert!(rxy > 0.9 && rxy <= 1.0);

        let perfect = pearson(&[1.0, 2.0, 3.0], &[-2.0, -4.0, -6.0]).unwrap();
        assert!((perfect + 1.0).abs() < 1e-12);
        assert_eq!(correlation_p_value(perfect, 3), 0.0);

        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_t_p_value_reference_points() {
        // t = 2.228 with 10 df is the 97.5th percentile
        let p = two_sided_t_p_value(2.228_138_852, 10.0);
        assert!((p - 0.05).abs() < 1e-4);
        assert!((two_sided_t_p_value(0.0, 5.0) - 1.0).abs() < 1e-12);
        assert_eq!(two_sided_t_p_value(f64::INFINITY, 5.0), 0.0);
        assert_eq!(two_sided_t_p_value(f64::NAN, 5.0), 1.0);
    }

    #[test]
    fn test_standard_normal_cdf() {
        assert!((standard_normal_cdf(0.0) - 0.5).abs() < 1e-12);
        assert!((standard_normal_cdf(1.959_963_985) - 0.975).abs() < 1e-6);
    }

    #[test]
    fn test_newey_west_lags() {
        assert_eq!(newey_west_lags(100), 4);
        assert_eq!(newey_west_lags(14), 2);
        assert_eq!(newey_west_lags(1), 1);
    }

    #[test]
    fn test_ols_recovers_coefficients() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let noise = |i: usize| if i % 2 == 0 { 0.4 } else { -0.4 };
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, xi)| 2.0 + 3.0 * xi + noise(i))
            .collect();

        let fit = ols_hac(&y, &[x], Some(2)).unwrap();
        assert!((fit.params[0] - 2.0).abs() < 0.5);
        assert!((fit.params[1] - 3.0).abs() < 0.01);
        assert!(fit.r_squared > 0.999);
        assert!(fit.p_values[1] < 1e-6);
        assert_eq!(fit.df_resid, 28);
        assert_eq!(fit.hac_lags, 2);
    }

    #[test]
    fn test_ols_adjusted_r_squared_can_be_negative() {
        // Predictor unrelated to the response
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = vec![5.0, 1.0, 4.0, 4.0, 1.0, 5.0];
        let fit = ols_hac(&y, &[x], None).unwrap();
        assert!(fit.r_squared.abs() < 1e-9);
        assert!((fit.adj_r_squared + 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_ols_detects_singular_design() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let doubled: Vec<f64> = x.iter().map(|v| v * 2.0).collect();
        let y: Vec<f64> = x.iter().map(|v| v + (v * 0.7).sin()).collect();
        assert_eq!(ols_hac(&y, &[x, doubled], None), Err(StatsError::Singular));
    }

    #[test]
    fn test_full_rank_detects_rolling_mean_of_lags() {
        let x: Vec<f64> = (0..20).map(|i| ((i * 7) % 11) as f64).collect();
        let lag1: Vec<f64> = x[1..19].to_vec();
        let lag2: Vec<f64> = x[0..18].to_vec();
        let now: Vec<f64> = x[2..20].to_vec();
        let ma3: Vec<f64> = (0..18).map(|i| (now[i] + lag1[i] + lag2[i]) / 3.0).collect();

        assert!(has_full_rank(&[now.clone(), lag1.clone(), lag2.clone()]));
        assert!(has_full_rank(&[now.clone(), ma3.clone()]));
        assert!(!has_full_rank(&[now, lag1, lag2, ma3]));
        assert!(!has_full_rank(&[vec![4.0; 18]]));
        assert!(!has_full_rank(&[]));
    }

    #[test]
    fn test_ols_rejects_constant_response_and_small_samples() {
        let x = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(
            ols_hac(&[3.0, 3.0, 3.0, 3.0], &[x.clone()], None),
            Err(StatsError::ConstantResponse)
        );
        assert!(matches!(
            ols_hac(&[1.0, 2.0], &[vec![1.0, 2.0]], None),
            Err(StatsError::TooFewObservations { .. })
        ));
    }

    #[test]
    fn test_hac_with_zero_lags_is_white_covariance() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let y = vec![1.2, 1.9, 3.4, 3.8, 5.3, 5.7, 7.4, 7.9];
        let fit = ols_hac(&y, &[x.clone()], Some(0)).unwrap();

        // Closed form HC1 slope variance for simple regression
        let mx = mean(&x).unwrap();
        let sxx: f64 = x.iter().map(|v| (v - mx) * (v - mx)).sum();
        let resid: Vec<f64> = x
            .iter()
            .zip(&y)
            .map(|(xi, yi)| yi - fit.params[0] - fit.params[1] * xi)
            .collect();
        let hc0: f64 = x
            .iter()
            .zip(&resid)
            .map(|(xi, e)| (xi - mx).powi(2) * e * e)
            .sum::<f64>()
            / (sxx * sxx);
        let hc1 = hc0 * 8.0 / 6.0;
        assert!((fit.std_errors[1] - hc1.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_welch_t_test() {
        let a = [10.0, 11.0, 9.0, 10.5, 9.5];
        let b = [12.0, 13.0, 12.5, 11.5, 13.5];
        let result = welch_t_test(&a, &b).unwrap();
        assert!((result.difference - 2.5).abs() < 1e-12);
        assert!(result.t > 0.0);
        assert!(result.p_value < 0.01);
        // Equal variances and sizes give df = 2n - 2
        assert!((result.df - 8.0).abs() < 1e-9);

        assert!(matches!(
            welch_t_test(&[1.0], &b),
            Err(StatsError::TooFewObservations { .. })
        ));
        assert_eq!(
            welch_t_test(&[2.0, 2.0], &[3.0, 3.0]),
            Err(StatsError::ZeroVariance)
        );
    }
}
