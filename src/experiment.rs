//! N-of-1 experiment design
//!
//! Turns a target's primary lever into a baseline-then-intervention trial:
//! how much to change the behavior per day, in which direction, how long to
//! wait for the effect, what to track, and how to judge the result.

use crate::config::{Confounder, GoalDirection, InsightConfig, Lever, TrackingCadence};
use crate::error::InsightError;
use crate::stats::{self, StatsError};
use crate::types::{CorrectedAssociation, DerivedFeatureTable, MetricsTable};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Name of the post-hoc test recorded in every success criterion
pub const SUCCESS_TEST: &str = "welch_t_test";

/// Direction of the recommended daily change to the lever
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    Increase,
    Decrease,
}

/// Recommended daily change to the lever
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dosage {
    /// Change per day in the lever's own units
    pub magnitude: f64,
    pub direction: ChangeDirection,
    /// Observed daily SD of the lever
    pub lever_sd: f64,
    pub fraction_of_sd: f64,
}

/// How the experiment is judged once both phases are recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriterion {
    pub test: String,
    pub metric: String,
    pub alpha: f64,
    /// Direction the goal metric must move for success
    pub expected_direction: GoalDirection,
}

/// A single-subject baseline/intervention experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDesign {
    pub target: String,
    pub goal: GoalDirection,
    pub lever: Lever,
    pub feature: String,
    pub lag: usize,
    pub coefficient: f64,
    pub q_value: f64,
    pub dosage: Dosage,
    pub expected_delay_days: usize,
    pub baseline_days: u32,
    pub intervention_days: u32,
    pub tracking_cadence: TrackingCadence,
    pub success_criterion: SuccessCriterion,
    pub confounders: Vec<Confounder>,
}

/// Calendar placement of the two phases, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSchedule {
    pub baseline_start: NaiveDate,
    pub baseline_end: NaiveDate,
    pub intervention_start: NaiveDate,
    pub intervention_end: NaiveDate,
}

impl ExperimentDesign {
    /// Lay the phases out starting on `start`
    pub fn schedule(&self, start: NaiveDate) -> ExperimentSchedule {
        let baseline_end = start + Duration::days(i64::from(self.baseline_days) - 1);
        let intervention_start = baseline_end + Duration::days(1);
        ExperimentSchedule {
            baseline_start: start,
            baseline_end,
            intervention_start,
            intervention_end: intervention_start
                + Duration::days(i64::from(self.intervention_days) - 1),
        }
    }
}

/// Result of applying the success criterion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentOutcome {
    pub target: String,
    pub baseline_mean: f64,
    pub intervention_mean: f64,
    /// intervention mean - baseline mean
    pub difference: f64,
    pub t: f64,
    pub df: f64,
    pub p_value: f64,
    pub success: bool,
}

/// Experiment designer
pub struct ExperimentDesigner<'a> {
    config: &'a InsightConfig,
}

impl<'a> ExperimentDesigner<'a> {
    pub fn new(config: &'a InsightConfig) -> Self {
        Self { config }
    }

    /// Observed daily SD of a lever's base metric
    pub fn lever_sd(table: &DerivedFeatureTable, base: &str) -> Result<f64, InsightError> {
        let values = stats::present(table.column(base)?);
        stats::sample_sd(&values).ok_or_else(|| {
            InsightError::UndefinedStatistic(format!(
                "SD of '{base}' needs at least 2 observations, got {}",
                values.len()
            ))
        })
    }

    /// Design an experiment from an association and its lever's daily SD.
    ///
    /// Deterministic in its inputs: the same association, SD and configuration
    /// always yield the same design.
    pub fn design(
        &self,
        association: &CorrectedAssociation,
        lever_sd: f64,
    ) -> Result<ExperimentDesign, InsightError> {
        let lever = Lever::from_metric(&association.base)
            .filter(|l| self.config.levers.contains(l))
            .ok_or_else(|| {
                InsightError::Configuration(format!(
                    "'{}' is not on the lever allow-list",
                    association.base
                ))
            })?;

        if !lever_sd.is_finite() || lever_sd <= 0.0 {
            return Err(InsightError::UndefinedStatistic(format!(
                "dosage for '{}' needs a positive lever SD, got {lever_sd}",
                association.base
            )));
        }
        if association.coefficient == 0.0 || !association.coefficient.is_finite() {
            return Err(InsightError::UndefinedStatistic(format!(
                "no direction for '{}' with coefficient {}",
                association.feature, association.coefficient
            )));
        }

        let goal = self.config.goal_for(&association.target);
        let direction = if association.coefficient.signum() * goal.as_f64() > 0.0 {
            ChangeDirection::Increase
        } else {
            ChangeDirection::Decrease
        };

        Ok(ExperimentDesign {
            target: association.target.clone(),
            goal,
            lever,
            feature: association.feature.clone(),
            lag: association.lag,
            coefficient: association.coefficient,
            q_value: association.q_value,
            dosage: Dosage {
                magnitude: self.config.dosage_fraction * lever_sd,
                direction,
                lever_sd,
                fraction_of_sd: self.config.dosage_fraction,
            },
            expected_delay_days: association.lag,
            baseline_days: self.config.baseline_days,
            intervention_days: self.config.intervention_days,
            tracking_cadence: self.config.tracking_cadence,
            success_criterion: SuccessCriterion {
                test: SUCCESS_TEST.to_string(),
                metric: association.target.clone(),
                alpha: self.config.fdr_threshold,
                expected_direction: goal,
            },
            confounders: Confounder::ALL.to_vec(),
        })
    }

    /// Apply the design's success criterion to the two phases' goal values
    pub fn evaluate(
        &self,
        design: &ExperimentDesign,
        baseline: &[f64],
        intervention: &[f64],
    ) -> Result<ExperimentOutcome, InsightError> {
        let test = stats::welch_t_test(baseline, intervention).map_err(|e| match e {
            StatsError::ZeroVariance => InsightError::UndefinedStatistic(format!(
                "'{}' did not vary in either phase",
                design.target
            )),
            other => InsightError::InsufficientData {
                target: design.target.clone(),
                reason: other.to_string(),
            },
        })?;

        let criterion = &design.success_criterion;
        let moved_as_expected =
            test.difference * criterion.expected_direction.as_f64() > 0.0;

        Ok(ExperimentOutcome {
            target: design.target.clone(),
            baseline_mean: test.mean_a,
            intervention_mean: test.mean_b,
            difference: test.difference,
            t: test.t,
            df: test.df,
            p_value: test.p_value,
            success: moved_as_expected && test.p_value < criterion.alpha,
        })
    }

    /// Evaluate against recorded days of `table` placed by `schedule`
    pub fn evaluate_table(
        &self,
        design: &ExperimentDesign,
        table: &MetricsTable,
        schedule: &ExperimentSchedule,
    ) -> Result<ExperimentOutcome, InsightError> {
        let baseline =
            table.values_between(&design.target, schedule.baseline_start, schedule.baseline_end)?;
        let intervention = table.values_between(
            &design.target,
            schedule.intervention_start,
            schedule.intervention_end,
        )?;
        self.evaluate(design, &baseline, &intervention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DailyMetricsRow, Sign};
    use pretty_assertions::assert_eq;

    fn steps_association(coefficient: f64) -> CorrectedAssociation {
        CorrectedAssociation {
            target: "deep_min".to_string(),
            feature: "steps_sum_lag2".to_string(),
            base: "steps_sum".to_string(),
            lag: 2,
            coefficient,
            p_value: 0.0004,
            q_value: 0.003,
            sign: Sign::of(coefficient),
            effect_magnitude: coefficient.abs(),
            standardized_effect: None,
        }
    }

    #[test]
    fn test_design_dosage_and_delay() {
        let config = InsightConfig::default();
        let design = ExperimentDesigner::new(&config)
            .design(&steps_association(0.002), 2500.0)
            .unwrap();

        assert_eq!(design.lever, Lever::StepsSum);
        assert!((design.dosage.magnitude - 750.0).abs() < 1e-9);
        assert_eq!(design.dosage.direction, ChangeDirection::Increase);
        assert_eq!(design.expected_delay_days, 2);
        assert_eq!(design.baseline_days, 7);
        assert_eq!(design.intervention_days, 7);
        assert_eq!(design.confounders.len(), 7);
        assert_eq!(design.confounders[0], Confounder::Illness);
        assert_eq!(design.success_criterion.test, SUCCESS_TEST);
    }

    #[test]
    fn test_direction_follows_goal() {
        let mut config = InsightConfig::default();
        config
            .goals
            .insert("deep_min".to_string(), GoalDirection::Decrease);
        let designer = ExperimentDesigner::new(&config);

        let up = designer.design(&steps_association(0.002), 1000.0).unwrap();
        assert_eq!(up.dosage.direction, ChangeDirection::Decrease);

        let down = designer.design(&steps_association(-0.002), 1000.0).unwrap();
        assert_eq!(down.dosage.direction, ChangeDirection::Increase);
    }

    #[test]
    fn test_design_is_deterministic() {
        let config = InsightConfig::default();
        let designer = ExperimentDesigner::new(&config);
        let a = designer.design(&steps_association(0.002), 2500.0).unwrap();
        let b = designer.design(&steps_association(0.002), 2500.0).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_design_rejects_non_lever_and_zero_sd() {
        let config = InsightConfig::default();
        let designer = ExperimentDesigner::new(&config);

        let mut not_lever = steps_association(0.5);
        not_lever.base = "deep_min".to_string();
        assert!(matches!(
            designer.design(&not_lever, 10.0),
            Err(InsightError::Configuration(_))
        ));
        assert!(matches!(
            designer.design(&steps_association(0.002), 0.0),
            Err(InsightError::UndefinedStatistic(_))
        ));
    }

    #[test]
    fn test_schedule_is_contiguous() {
        let config = InsightConfig::default();
        let design = ExperimentDesigner::new(&config)
            .design(&steps_association(0.002), 2500.0)
            .unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let schedule = design.schedule(start);

        assert_eq!(schedule.baseline_end, NaiveDate::from_ymd_opt(2024, 6, 7).unwrap());
        assert_eq!(schedule.intervention_start, NaiveDate::from_ymd_opt(2024, 6, 8).unwrap());
        assert_eq!(schedule.intervention_end, NaiveDate::from_ymd_opt(2024, 6, 14).unwrap());
    }

    #[test]
    fn test_evaluate_table() {
        let config = InsightConfig::default();
        let designer = ExperimentDesigner::new(&config);
        let design = designer.design(&steps_association(0.002), 2500.0).unwrap();

        let start = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let deep = [
            60.0, 62.0, 58.0, 61.0, 59.0, 63.0, 60.0, 70.0, 72.0, 69.0, 71.0, 73.0, 70.0, 72.0,
        ];
        let rows: Vec<DailyMetricsRow> = deep
            .iter()
            .enumerate()
            .map(|(i, v)| {
                DailyMetricsRow::new(start + Duration::days(i as i64))
                    .with_metric("deep_min", Some(*v))
            })
            .collect();
        let table = MetricsTable::from_rows(&rows);

        let outcome = designer
            .evaluate_table(&design, &table, &design.schedule(start))
            .unwrap();
        assert!(outcome.difference > 9.0);
        assert!(outcome.p_value < 0.001);
        assert!(outcome.success);
    }

    #[test]
    fn test_evaluate_needs_two_observations_per_phase() {
        let config = InsightConfig::default();
        let designer = ExperimentDesigner::new(&config);
        let design = designer.design(&steps_association(0.002), 2500.0).unwrap();

        assert!(matches!(
            designer.evaluate(&design, &[60.0], &[70.0, 71.0]),
            Err(InsightError::InsufficientData { .. })
        ));
        assert!(matches!(
            designer.evaluate(&design, &[60.0, 60.0], &[70.0, 70.0]),
            Err(InsightError::UndefinedStatistic(_))
        ));
    }
}
