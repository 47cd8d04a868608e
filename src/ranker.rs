//! Insight ranking
//!
//! Orders targets by model quality and, per target, orders the corrected
//! predictors by significance and effect size. Every comparison ends in a
//! name tie-break so identical input always yields identical order.

use crate::config::InsightConfig;
use crate::types::{CorrectedAssociation, ModelResult};
use serde::{Deserialize, Serialize};

/// A target's position in the model-quality ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTarget {
    /// 1-based rank
    pub rank: usize,
    pub target: String,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub aic: f64,
    pub n_obs: usize,
}

/// A significant predictor of one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPredictor {
    pub feature: String,
    pub base: String,
    pub lag: usize,
    pub coefficient: f64,
    pub p_value: f64,
    pub q_value: f64,
    /// Base metric is on the behavioral lever allow-list
    pub is_lever: bool,
    /// Top predictor that is also a lever
    pub primary: bool,
}

/// Targets by adjusted R² descending, then AIC ascending, then name
pub fn rank_targets(results: &[ModelResult]) -> Vec<RankedTarget> {
    let mut ordered: Vec<&ModelResult> = results.iter().collect();
    ordered.sort_by(|a, b| {
        b.adj_r_squared
            .total_cmp(&a.adj_r_squared)
            .then_with(|| a.aic.total_cmp(&b.aic))
            .then_with(|| a.target.cmp(&b.target))
    });

    ordered
        .into_iter()
        .enumerate()
        .map(|(i, r)| RankedTarget {
            rank: i + 1,
            target: r.target.clone(),
            r_squared: r.r_squared,
            adj_r_squared: r.adj_r_squared,
            aic: r.aic,
            n_obs: r.n_obs,
        })
        .collect()
}

/// Significant predictors of `target`, by q ascending then |coefficient| descending.
///
/// The first entry is marked primary when its base metric is a lever.
pub fn rank_predictors(
    target: &str,
    associations: &[CorrectedAssociation],
    config: &InsightConfig,
) -> Vec<RankedPredictor> {
    let mut selected: Vec<&CorrectedAssociation> = associations
        .iter()
        .filter(|a| a.target == target && a.q_value < config.fdr_threshold)
        .collect();

    selected.sort_by(|a, b| {
        a.q_value
            .total_cmp(&b.q_value)
            .then_with(|| b.effect_magnitude.total_cmp(&a.effect_magnitude))
            .then_with(|| a.feature.cmp(&b.feature))
    });

    selected
        .into_iter()
        .enumerate()
        .map(|(i, a)| {
            let is_lever = config.is_lever(&a.base);
            RankedPredictor {
                feature: a.feature.clone(),
                base: a.base.clone(),
                lag: a.lag,
                coefficient: a.coefficient,
                p_value: a.p_value,
                q_value: a.q_value,
                is_lever,
                primary: i == 0 && is_lever,
            }
        })
        .collect()
}

/// The association behind a target's primary lever, if any
pub fn primary_lever<'a>(
    target: &str,
    associations: &'a [CorrectedAssociation],
    config: &InsightConfig,
) -> Option<&'a CorrectedAssociation> {
    let top = rank_predictors(target, associations, config)
        .into_iter()
        .next()
        .filter(|p| p.primary)?;
    associations
        .iter()
        .find(|a| a.target == target && a.feature == top.feature)
}
