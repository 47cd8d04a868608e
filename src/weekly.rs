//! Weekly descriptive report
//!
//! Per metric, the mean of the week, its change against the subject's own
//! previous week, and its percentile within an external reference population.
//! A value that cannot be computed is reported as undefined with a reason,
//! never as a number.

use crate::error::InsightError;
use crate::stats;
use crate::types::MetricsTable;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Days in a report week
pub const WEEK_DAYS: i64 = 7;

/// A reported number, or the reason there is none
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Statistic {
    Value { value: f64 },
    Undefined { reason: String },
}

impl Statistic {
    pub fn undefined(reason: impl Into<String>) -> Self {
        Statistic::Undefined {
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Statistic::Value { value } => Some(*value),
            Statistic::Undefined { .. } => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Statistic::Value { .. })
    }
}

/// Population mean and SD for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceStats {
    pub mean: f64,
    pub sd: f64,
}

/// External reference statistics keyed by metric name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferencePopulation {
    metrics: BTreeMap<String, ReferenceStats>,
}

impl ReferencePopulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metric(mut self, name: &str, mean: f64, sd: f64) -> Self {
        self.metrics.insert(name.to_string(), ReferenceStats { mean, sd });
        self
    }

    pub fn get(&self, name: &str) -> Option<&ReferenceStats> {
        self.metrics.get(name)
    }

    /// Parse `{ "metric": { "mean": .., "sd": .. }, .. }`
    pub fn from_json(json: &str) -> Result<Self, InsightError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One metric's line in the weekly report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric: String,
    /// Mean over the report week
    pub value: Statistic,
    pub days_observed: usize,
    /// Mean over the week before
    pub prior_value: Statistic,
    pub pct_change_vs_self: Statistic,
    pub percentile_vs_population: Statistic,
}

/// Descriptive statistics for the seven days ending `week_end`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReport {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub metrics: Vec<MetricSummary>,
}

impl WeeklyReport {
    /// Build the report for every metric of the table.
    ///
    /// Fails on unsorted or duplicate dates, like every other consumer of the table.
    pub fn build(
        table: &MetricsTable,
        week_end: NaiveDate,
        references: &ReferencePopulation,
    ) -> Result<Self, InsightError> {
        table.validate_order()?;

        let week_start = week_end - Duration::days(WEEK_DAYS - 1);
        let prior_end = week_start - Duration::days(1);
        let prior_start = prior_end - Duration::days(WEEK_DAYS - 1);

        let mut metrics = Vec::new();
        for name in table.column_names() {
            let current = table.values_between(name, week_start, week_end)?;
            let prior = table.values_between(name, prior_start, prior_end)?;

            let value = mean_statistic(&current, "no observations in the report week");
            let prior_value = mean_statistic(&prior, "no observations in the prior week");
            let pct_change_vs_self = pct_change(&value, &prior_value);
            let percentile_vs_population = percentile(&value, references.get(name));

            metrics.push(MetricSummary {
                metric: name.to_string(),
                value,
                days_observed: current.len(),
                prior_value,
                pct_change_vs_self,
                percentile_vs_population,
            });
        }

        Ok(Self {
            week_start,
            week_end,
            metrics,
        })
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.iter().find(|m| m.metric == name)
    }

    pub fn to_json(&self) -> Result<String, InsightError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn mean_statistic(values: &[f64], empty_reason: &str) -> Statistic {
    match stats::mean(values) {
        Some(value) => Statistic::Value { value },
        None => Statistic::undefined(empty_reason),
    }
}

/// Percent change of `current` against `prior`
pub fn pct_change(current: &Statistic, prior: &Statistic) -> Statistic {
    match (current.value(), prior.value()) {
        (Some(c), Some(p)) if p != 0.0 => Statistic::Value {
            value: (c - p) / p.abs() * 100.0,
        },
        (Some(_), Some(_)) => Statistic::undefined("prior value is zero"),
        (None, _) => Statistic::undefined("no current value"),
        (_, None) => Statistic::undefined("no prior value"),
    }
}

/// Percentile of `current` in a normal reference population
pub fn percentile(current: &Statistic, reference: Option<&ReferenceStats>) -> Statistic {
    let value = match current.value() {
        Some(v) => v,
        None => return Statistic::undefined("no current value"),
    };
    let reference = match reference {
        Some(r) => r,
        None => return Statistic::undefined("no reference population for metric"),
    };
    if !(reference.sd > 0.0) || !reference.sd.is_finite() || !reference.mean.is_finite() {
        return Statistic::undefined("reference SD must be positive");
    }

    let z = (value - reference.mean) / reference.sd;
    Statistic::Value {
        value: 100.0 * stats::standard_normal_cdf(z),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DailyMetricsRow;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn table() -> MetricsTable {
        let rows: Vec<DailyMetricsRow> = (1..=14)
            .map(|d| {
                let steps = if d <= 7 { 8000.0 } else { 10000.0 };
                DailyMetricsRow::new(day(d))
                    .with_metric("steps_sum", Some(steps))
                    .with_metric("hrv_mean", if d <= 7 { Some(0.0) } else { Some(45.0) })
                    .with_metric("glucose_mean", if d == 3 { Some(95.0) } else { None })
            })
            .collect();
        MetricsTable::from_rows(&rows)
    }

    #[test]
    fn test_value_and_change_vs_self() {
        let refs = ReferencePopulation::new().with_metric("steps_sum", 10000.0, 3000.0);
        let report = WeeklyReport::build(&table(), day(14), &refs).unwrap();

        assert_eq!(report.week_start, day(8));
        let steps = report.metric("steps_sum").unwrap();
        assert_eq!(steps.value.value(), Some(10000.0));
        assert_eq!(steps.days_observed, 7);
        assert_eq!(steps.prior_value.value(), Some(8000.0));
        assert!((steps.pct_change_vs_self.value().unwrap() - 25.0).abs() < 1e-9);
        assert!((steps.percentile_vs_population.value().unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_prior_is_undefined() {
        let report = WeeklyReport::build(&table(), day(14), &ReferencePopulation::new()).unwrap();
        let hrv = report.metric("hrv_mean").unwrap();

        assert_eq!(hrv.pct_change_vs_self, Statistic::undefined("prior value is zero"));
        assert!(!hrv.percentile_vs_population.is_defined());
    }

    #[test]
    fn test_zero_reference_sd_is_undefined() {
        let refs = ReferencePopulation::new().with_metric("steps_sum", 9000.0, 0.0);
        let report = WeeklyReport::build(&table(), day(14), &refs).unwrap();
        assert!(!report
            .metric("steps_sum")
            .unwrap()
            .percentile_vs_population
            .is_defined());
    }

    #[test]
    fn test_metric_without_week_data() {
        let report = WeeklyReport::build(&table(), day(14), &ReferencePopulation::new()).unwrap();
        let glucose = report.metric("glucose_mean").unwrap();
        assert!(!glucose.value.is_defined());
        assert_eq!(glucose.days_observed, 0);
        assert!(glucose.prior_value.is_defined());
    }

    #[test]
    fn test_reference_json_and_statistic_encoding() {
        let refs =
            ReferencePopulation::from_json(r#"{"steps_sum": {"mean": 7500, "sd": 2500}}"#).unwrap();
        assert_eq!(refs.get("steps_sum").unwrap().sd, 2500.0);

        let json = serde_json::to_string(&Statistic::undefined("prior value is zero")).unwrap();
        assert!(json.contains("\"status\":\"undefined\""));
        let json = serde_json::to_string(&Statistic::Value { value: 1.5 }).unwrap();
        assert!(json.contains("\"status\":\"value\""));
    }

    #[test]
    fn test_unsorted_table_fails() {
        let table = MetricsTable::from_rows(&[
            DailyMetricsRow::new(day(2)).with_metric("steps_sum", Some(1.0)),
            DailyMetricsRow::new(day(1)).with_metric("steps_sum", Some(1.0)),
        ]);
        assert!(matches!(
            WeeklyReport::build(&table, day(2), &ReferencePopulation::new()),
            Err(InsightError::Ordering(_))
        ));
    }
}
