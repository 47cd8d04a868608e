//! Per-target modeling
//!
//! Fits one explanatory regression per target metric against its candidate
//! features. Coefficients are plain least squares; inference uses
//! Newey-West standard errors because day-to-day health data is serially
//! correlated.

use crate::config::InsightConfig;
use crate::error::InsightError;
use crate::stats::{self, StatsError};
use crate::types::{Coefficient, ColumnSpec, DerivedFeatureTable, ModelResult, ScreenedCandidate};
use log::debug;
use std::collections::BTreeSet;

/// Modeler for a single batch run
pub struct TargetModeler<'a> {
    config: &'a InsightConfig,
}

impl<'a> TargetModeler<'a> {
    pub fn new(config: &'a InsightConfig) -> Self {
        Self { config }
    }

    /// Whether `feature` may never explain `target`.
    ///
    /// Excluded: the target itself, same-day transforms of the target, same-day
    /// columns of a configured tautological partner, and every same-day column
    /// when only lagged predictors are allowed.
    pub fn is_excluded(&self, target: &ColumnSpec, feature: &ColumnSpec) -> bool {
        if feature.name == target.name {
            return true;
        }
        if !feature.is_same_day() {
            return false;
        }
        feature.base == target.base
            || self.config.exclusion.lagged_only
            || self.config.exclusion.is_tautological(&target.base, &feature.base)
    }

    /// Every usable, non-excluded column of the table, in registry order
    pub fn candidate_features(
        &self,
        table: &DerivedFeatureTable,
        target: &str,
    ) -> Result<Vec<String>, InsightError> {
        let target_spec = table.spec(target)?;
        Ok(table
            .usable_columns()
            .filter(|spec| !self.is_excluded(target_spec, spec))
            .map(|spec| spec.name.clone())
            .collect())
    }

    /// Keep at most `max_features` candidates by absolute correlation with the target.
    ///
    /// Candidates are taken greedily in order of |r|, skipping any whose column
    /// would make the design rank-deficient on the rows the fit will use
    /// (a rolling mean next to the lags it averages, for instance). Candidates
    /// with too little overlap or zero variance are never scored. Ties are
    /// broken by name so the selection is reproducible.
    pub fn screen(
        &self,
        table: &DerivedFeatureTable,
        target: &str,
        candidates: &[String],
    ) -> Result<Screening, InsightError> {
        let y = table.column(target)?;
        let mut scored: Vec<ScreenedCandidate> = Vec::with_capacity(candidates.len());

        for name in candidates {
            let (a, b) = stats::paired(table.column(name)?, y);
            if a.len() < self.config.min_pair_overlap {
                continue;
            }
            if let Some(r) = stats::pearson(&a, &b) {
                scored.push(ScreenedCandidate {
                    feature: name.clone(),
                    r,
                    p_value: stats::correlation_p_value(r, a.len()),
                    n: a.len(),
                });
            }
        }

        scored.sort_by(|a, b| {
            b.r.abs()
                .total_cmp(&a.r.abs())
                .then_with(|| a.feature.cmp(&b.feature))
        });

        let mut screening = Screening::default();
        let mut selected_cols: Vec<&[Option<f64>]> = Vec::new();
        for candidate in scored {
            if screening.selected.len() >= self.config.max_features {
                screening.rejected.push(candidate);
                continue;
            }
            let col = table.column(&candidate.feature)?;
            if keeps_full_rank(y, &selected_cols, col) {
                selected_cols.push(col);
                screening.selected.push(candidate);
            } else {
                debug!(
                    "{}: skipping {}, collinear with {:?}",
                    target,
                    candidate.feature,
                    screening.features()
                );
                screening.rejected.push(candidate);
            }
        }

        debug!(
            "screened {} of {} candidates for {}",
            screening.selected.len(),
            candidates.len(),
            target
        );
        Ok(screening)
    }

    /// Screen the target's candidates and fit the survivors.
    ///
    /// The result carries every scored candidate that was not fitted, and each
    /// coefficient keeps its screening p-value, so multiple-testing correction
    /// accounts for the selection.
    pub fn fit_screened(
        &self,
        table: &DerivedFeatureTable,
        target: &str,
    ) -> Result<ModelResult, InsightError> {
        let candidates = self.candidate_features(table, target)?;
        let screening = self.screen(table, target, &candidates)?;
        let mut result = self.fit(table, target, &screening.features())?;
        for coef in &mut result.coefficients {
            coef.screening_p_value = screening
                .selected
                .iter()
                .find(|c| c.feature == coef.feature)
                .map(|c| c.p_value);
        }
        result.screened_out = screening.rejected;
        Ok(result)
    }

    /// Fit `target` against `candidates` on complete cases.
    ///
    /// Excluded and unusable candidates are dropped before fitting. Fails with
    /// `InsufficientData` when nothing is left to fit or the residual degrees of
    /// freedom fall below the configured minimum, and with `SingularDesign`
    /// when the predictors are collinear.
    pub fn fit(
        &self,
        table: &DerivedFeatureTable,
        target: &str,
        candidates: &[String],
    ) -> Result<ModelResult, InsightError> {
        let target_spec = table.spec(target)?;

        let mut seen = BTreeSet::new();
        let mut features: Vec<&ColumnSpec> = Vec::new();
        for name in candidates {
            let spec = table.spec(name)?;
            if spec.usable && !self.is_excluded(target_spec, spec) && seen.insert(name.as_str()) {
                features.push(spec);
            }
        }

        if features.is_empty() {
            return Err(InsightError::InsufficientData {
                target: target.to_string(),
                reason: "no usable candidate features".to_string(),
            });
        }

        let y_col = table.column(target)?;
        let x_cols = features
            .iter()
            .map(|spec| table.column(&spec.name))
            .collect::<Result<Vec<_>, _>>()?;

        // Complete-case rows
        let rows: Vec<usize> = (0..table.len())
            .filter(|&i| y_col[i].is_some() && x_cols.iter().all(|c| c[i].is_some()))
            .collect();

        let n = rows.len();
        if n < self.config.min_sample_size {
            return Err(InsightError::InsufficientData {
                target: target.to_string(),
                reason: format!(
                    "{n} complete rows, at least {} required",
                    self.config.min_sample_size
                ),
            });
        }

        let k = features.len() + 1;
        let df = n.saturating_sub(k);
        if n <= k || df < self.config.min_residual_df {
            return Err(InsightError::InsufficientData {
                target: target.to_string(),
                reason: format!(
                    "{df} residual degrees of freedom with {} features, at least {} required",
                    features.len(),
                    self.config.min_residual_df
                ),
            });
        }

        let y: Vec<f64> = rows.iter().filter_map(|&i| y_col[i]).collect();
        let xs: Vec<Vec<f64>> = x_cols
            .iter()
            .map(|c| rows.iter().filter_map(|&i| c[i]).collect())
            .collect();

        let fit = stats::ols_hac(&y, &xs, self.config.hac_max_lags)
            .map_err(|e| fit_error(target, e))?;

        let coefficients = features
            .iter()
            .zip(&xs)
            .enumerate()
            .map(|(j, (spec, x))| Coefficient {
                feature: spec.name.clone(),
                base: spec.base.clone(),
                lag: spec.lag(),
                coefficient: fit.params[j + 1],
                std_error: fit.std_errors[j + 1],
                t_value: fit.t_values[j + 1],
                p_value: fit.p_values[j + 1],
                feature_sd: stats::sample_sd(x).unwrap_or(0.0),
                screening_p_value: None,
            })
            .collect();

        Ok(ModelResult {
            target: target.to_string(),
            intercept: fit.params[0],
            coefficients,
            r_squared: fit.r_squared,
            adj_r_squared: fit.adj_r_squared,
            aic: fit.aic,
            n_obs: fit.n,
            df_resid: fit.df_resid,
            hac_lags: fit.hac_lags,
            target_sd: stats::sample_sd(&y).unwrap_or(0.0),
            screened_out: Vec::new(),
        })
    }
}

/// Outcome of correlation screening for one target
#[derive(Debug, Clone, Default)]
pub struct Screening {
    /// Candidates to fit, strongest first
    pub selected: Vec<ScreenedCandidate>,
    /// Scored candidates left out, by the feature cap or for collinearity
    pub rejected: Vec<ScreenedCandidate>,
}

impl Screening {
    /// Names of the selected features, in selection order
    pub fn features(&self) -> Vec<String> {
        self.selected.iter().map(|c| c.feature.clone()).collect()
    }
}

/// Whether adding `candidate` to `selected` keeps an intercept-plus-features
/// design invertible on the complete rows of target and features.
fn keeps_full_rank(
    target: &[Option<f64>],
    selected: &[&[Option<f64>]],
    candidate: &[Option<f64>],
) -> bool {
    let rows: Vec<usize> = (0..target.len())
        .filter(|&i| {
            target[i].is_some()
                && candidate[i].is_some()
                && selected.iter().all(|c| c[i].is_some())
        })
        .collect();
    let columns: Vec<Vec<f64>> = selected
        .iter()
        .copied()
        .chain(std::iter::once(candidate))
        .map(|c| rows.iter().filter_map(|&i| c[i]).collect())
        .collect();
    stats::has_full_rank(&columns)
}

fn fit_error(target: &str, error: StatsError) -> InsightError {
    match error {
        StatsError::Singular => InsightError::SingularDesign {
            target: target.to_string(),
        },
        StatsError::ConstantResponse => InsightError::InsufficientData {
            target: target.to_string(),
            reason: "target has zero variance over the complete rows".to_string(),
        },
        other => InsightError::InsufficientData {
            target: target.to_string(),
            reason: other.to_string(),
        },
    }
}
