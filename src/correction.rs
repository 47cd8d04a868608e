//! Multiple-testing correction
//!
//! Benjamini-Hochberg step-up procedure over a family of p-values, plus the
//! flattening of per-target model coefficients into corrected associations.

use crate::config::CorrectionFamily;
use crate::types::{CorrectedAssociation, ModelResult, Sign};
use std::collections::BTreeMap;

/// Benjamini-Hochberg q-values, returned in input order.
///
/// NaN p-values are treated as 1. Every q lies in [0, 1], q >= p, and q is
/// non-decreasing in ascending p order.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let n = p_values.len();
    if n == 0 {
        return Vec::new();
    }

    let clean: Vec<f64> = p_values
        .iter()
        .map(|&p| if p.is_nan() { 1.0 } else { p.clamp(0.0, 1.0) })
        .collect();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| clean[a].total_cmp(&clean[b]).then(a.cmp(&b)));

    let mut q = vec![0.0; n];
    let mut running_min = 1.0_f64;
    for rank in (0..n).rev() {
        let idx = order[rank];
        let adjusted = clean[idx] * n as f64 / (rank + 1) as f64;
        running_min = running_min.min(adjusted);
        q[idx] = running_min.clamp(0.0, 1.0);
    }

    q
}

/// Flatten every model coefficient into a hypothesis and attach its q-value.
///
/// The family also holds the correlation test of every candidate a model
/// screened out, so a target that had many candidates to choose from pays
/// for all of them. Screened-in coefficients enter with
/// [`Coefficient::family_p_value`](crate::types::Coefficient::family_p_value). Those extra hypotheses take part in the step-up but are
/// not returned. With a pooled family all hypotheses of the run are corrected
/// together; per-target families are corrected independently. Output is
/// ordered by target, then by the model's coefficient order.
pub fn correct_associations(
    results: &[ModelResult],
    family: CorrectionFamily,
) -> Vec<CorrectedAssociation> {
    let mut associations: Vec<CorrectedAssociation> = results
        .iter()
        .flat_map(|result| {
            result.coefficients.iter().map(move |c| {
                let standardized = if c.feature_sd > 0.0 && result.target_sd > 0.0 {
                    Some(c.coefficient * c.feature_sd / result.target_sd)
                } else {
                    None
                };
                CorrectedAssociation {
                    target: result.target.clone(),
                    feature: c.feature.clone(),
                    base: c.base.clone(),
                    lag: c.lag,
                    coefficient: c.coefficient,
                    p_value: c.p_value,
                    q_value: 1.0,
                    sign: Sign::of(c.coefficient),
                    effect_magnitude: c.coefficient.abs(),
                    standardized_effect: standardized,
                }
            })
        })
        .collect();

    // (target, p-value, index into `associations` for fitted coefficients)
    let mut hypotheses: Vec<(&str, f64, Option<usize>)> = Vec::new();
    let mut next = 0;
    for result in results {
        for c in &result.coefficients {
            hypotheses.push((result.target.as_str(), c.family_p_value(), Some(next)));
            next += 1;
        }
        for screened in &result.screened_out {
            hypotheses.push((result.target.as_str(), screened.p_value, None));
        }
    }

    let families: Vec<Vec<usize>> = match family {
        CorrectionFamily::Pooled => vec![(0..hypotheses.len()).collect()],
        CorrectionFamily::PerTarget => {
            let mut by_target: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
            for (h, &(target, _, _)) in hypotheses.iter().enumerate() {
                by_target.entry(target).or_default().push(h);
            }
            by_target.into_values().collect()
        }
    };

    for members in families {
        let p: Vec<f64> = members.iter().map(|&h| hypotheses[h].1).collect();
        for (&h, q) in members.iter().zip(benjamini_hochberg(&p)) {
            if let Some(i) = hypotheses[h].2 {
                associations[i].q_value = q;
            }
        }
    }

    associations
}

/// Number of hypotheses a correction over `results` accounts for
pub fn hypothesis_count(results: &[ModelResult]) -> usize {
    results
        .iter()
        .map(|r| r.coefficients.len() + r.screened_out.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coefficient, ScreenedCandidate};

    fn assert_bh_invariants(p: &[f64], q: &[f64]) {
        assert_eq!(p.len(), q.len());
        let mut pairs: Vec<(f64, f64)> = p.iter().copied().zip(q.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        for w in pairs.windows(2) {
            assert!(w[1].1 >= w[0].1, "q not monotone: {pairs:?}");
        }
        for (pi, qi) in p.iter().zip(q) {
            assert!((0.0..=1.0).contains(qi));
            assert!(*qi >= *pi);
        }
    }

    #[test]
    fn test_known_values() {
        let p = [0.01, 0.04, 0.03, 0.005];
        let q = benjamini_hochberg(&p);
        // Sorted: 0.005, 0.01, 0.03, 0.04 -> 0.02, 0.02, 0.04, 0.04
        let expected = [0.02, 0.04, 0.04, 0.02];
        for (a, b) in q.iter().zip(expected) {
            assert!((a - b).abs() < 1e-12, "{q:?}");
        }
        assert_bh_invariants(&p, &q);
    }

    #[test]
    fn test_invariants_hold_on_irregular_input() {
        let p = [0.9, 0.0001, 0.5, 0.049, 0.051, 0.2, 0.0001, 1.0, 0.33, 0.02];
        let q = benjamini_hochberg(&p);
        assert_bh_invariants(&p, &q);
    }

    #[test]
    fn test_clamped_and_nan() {
        let q = benjamini_hochberg(&[0.8, 0.9, f64::NAN]);
        assert!(q.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(q[2], 1.0);
        assert!(benjamini_hochberg(&[]).is_empty());
    }

    fn model(target: &str, p_values: &[f64]) -> ModelResult {
        ModelResult {
            target: target.to_string(),
            intercept: 0.0,
            coefficients: p_values
                .iter()
                .enumerate()
                .map(|(i, &p)| Coefficient {
                    feature: format!("steps_sum_lag{}", i + 1),
                    base: "steps_sum".to_string(),
                    lag: i + 1,
                    coefficient: if i % 2 == 0 { 0.2 } else { -0.1 },
                    std_error: 0.05,
                    t_value: 2.0,
                    p_value: p,
                    feature_sd: 1000.0,
                    screening_p_value: None,
                })
                .collect(),
            r_squared: 0.5,
            adj_r_squared: 0.4,
            aic: 100.0,
            n_obs: 30,
            df_resid: 27,
            hac_lags: 2,
            target_sd: 10.0,
            screened_out: Vec::new(),
        }
    }

    #[test]
    fn test_pooled_family_spans_targets() {
        let results = vec![model("rem_min", &[0.01, 0.5]), model("hrv_mean", &[0.02])];
        let pooled = correct_associations(&results, CorrectionFamily::Pooled);
        let per_target = correct_associations(&results, CorrectionFamily::PerTarget);

        assert_eq!(pooled.len(), 3);
        // Pooled: n = 3; per-target: n = 2 and n = 1
        assert!((pooled[0].q_value - 0.03).abs() < 1e-12);
        assert!((per_target[0].q_value - 0.02).abs() < 1e-12);
        assert!((per_target[2].q_value - 0.02).abs() < 1e-12);

        assert_eq!(pooled[1].sign, Sign::Negative);
        assert!((pooled[1].effect_magnitude - 0.1).abs() < 1e-12);
        assert_eq!(pooled[0].standardized_effect, Some(0.2 * 1000.0 / 10.0));
    }

    #[test]
    fn test_screened_candidates_join_the_family() {
        let mut result = model("hrv_mean", &[0.001]);
        result.screened_out = (0..99)
            .map(|i| ScreenedCandidate {
                feature: format!("noise_{i}"),
                r: 0.05,
                p_value: 0.5,
                n: 30,
            })
            .collect();
        let results = vec![result, model("rem_min", &[0.04])];

        let pooled = correct_associations(&results, CorrectionFamily::Pooled);
        assert_eq!(pooled.len(), 2);
        assert_eq!(hypothesis_count(&results), 101);
        // 0.001 * 101 / 1 instead of 0.001 * 2 / 1
        assert!((pooled[0].q_value - 0.101).abs() < 1e-12);
        assert!(pooled[0].q_value > 0.05);

        let per_target = correct_associations(&results, CorrectionFamily::PerTarget);
        assert!((per_target[0].q_value - 0.1).abs() < 1e-12);
        assert!((per_target[1].q_value - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_weak_screening_correlation_caps_significance() {
        let mut strong_fit = model("hrv_mean", &[1e-6, 0.2]);
        strong_fit.coefficients[0].screening_p_value = Some(0.03);
        strong_fit.coefficients[1].screening_p_value = Some(0.01);

        let corrected = correct_associations(&[strong_fit], CorrectionFamily::Pooled);
        // Family p-values 0.03 and 0.2; reported p stays the slope test's
        assert!((corrected[0].q_value - 0.06).abs() < 1e-12);
        assert_eq!(corrected[0].p_value, 1e-6);
        assert!((corrected[1].q_value - 0.2).abs() < 1e-12);
    }
}
