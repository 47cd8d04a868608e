//! Core types for the Synheart Insight pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! batch run: the canonical daily metrics table, the derived feature table with
//! its column registry, per-target model results, and corrected associations.

use crate::error::InsightError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One calendar day of canonical metrics for a single subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetricsRow {
    /// Calendar day this row represents
    pub date: NaiveDate,
    /// Metric name to nullable value (e.g. `rem_min`, `steps_sum`, `glucose_mean`)
    pub metrics: BTreeMap<String, Option<f64>>,
}

impl DailyMetricsRow {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            metrics: BTreeMap::new(),
        }
    }

    /// Builder-style setter used by adapters and tests
    pub fn with_metric(mut self, name: &str, value: Option<f64>) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }
}

/// Canonical per-day metrics table, column-major.
///
/// Rows are kept in the order they were supplied. Ordering is validated by the
/// consumers that depend on it rather than silently corrected here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsTable {
    dates: Vec<NaiveDate>,
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl MetricsTable {
    /// Build a table from rows. Metrics absent from a row are null for that day.
    pub fn from_rows(rows: &[DailyMetricsRow]) -> Self {
        let names: BTreeSet<&String> = rows.iter().flat_map(|r| r.metrics.keys()).collect();

        let columns = names
            .into_iter()
            .map(|name| {
                let values = rows
                    .iter()
                    .map(|r| r.metrics.get(name).copied().flatten())
                    .collect();
                (name.clone(), values)
            })
            .collect();

        Self {
            dates: rows.iter().map(|r| r.date).collect(),
            columns,
        }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Metric names in sorted order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn column(&self, name: &str) -> Result<&[Option<f64>], InsightError> {
        self.columns
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| InsightError::UnknownColumn(name.to_string()))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Check that dates are strictly ascending (unique and sorted)
    pub fn validate_order(&self) -> Result<(), InsightError> {
        for pair in self.dates.windows(2) {
            if pair[1] == pair[0] {
                return Err(InsightError::Ordering(format!("duplicate date {}", pair[1])));
            }
            if pair[1] < pair[0] {
                return Err(InsightError::Ordering(format!(
                    "date {} follows {}",
                    pair[1], pair[0]
                )));
            }
        }
        Ok(())
    }

    /// Return a copy with every missing calendar day present as an all-null row.
    ///
    /// Values are never interpolated; a gap day carries nulls in every column.
    /// Fails when the first and last dates are more than `max_days` days apart
    /// (inclusive), which catches a mistyped year before anything is allocated.
    pub fn fill_calendar_gaps(&self, max_days: usize) -> Result<MetricsTable, InsightError> {
        self.validate_order()?;

        let (first, last) = match (self.dates.first(), self.dates.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return Ok(self.clone()),
        };

        let span = (last - first).num_days() as usize + 1;
        if span > max_days {
            return Err(InsightError::Ordering(format!(
                "dates {first} to {last} span {span} days, limit is {max_days}"
            )));
        }
        if span == self.dates.len() {
            return Ok(self.clone());
        }

        let dates: Vec<NaiveDate> = first.iter_days().take(span).collect();
        let mut columns: BTreeMap<String, Vec<Option<f64>>> = self
            .columns
            .keys()
            .map(|k| (k.clone(), vec![None; span]))
            .collect();

        for (row, date) in self.dates.iter().enumerate() {
            let slot = (*date - first).num_days() as usize;
            for (name, values) in &self.columns {
                if let Some(target) = columns.get_mut(name) {
                    target[slot] = values[row];
                }
            }
        }

        Ok(MetricsTable { dates, columns })
    }

    /// Non-null values of a metric for dates in `[start, end]`
    pub fn values_between(
        &self,
        name: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<f64>, InsightError> {
        let column = self.column(name)?;
        Ok(self
            .dates
            .iter()
            .zip(column)
            .filter(|(d, _)| **d >= start && **d <= end)
            .filter_map(|(_, v)| *v)
            .collect())
    }
}

/// Provenance of a column in the derived feature table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnKind {
    /// Original metric
    Base,
    /// Value from `lag` days earlier
    Lag { lag: usize },
    /// Trailing mean over `window` days ending today
    Rolling { window: usize },
    /// Trailing mean over `window` days of the `lag` column
    LagRolling { lag: usize, window: usize },
}

impl ColumnKind {
    /// Column name for this transform applied to `base`
    pub fn column_name(&self, base: &str) -> String {
        match self {
            ColumnKind::Base => base.to_string(),
            ColumnKind::Lag { lag } => format!("{base}_lag{lag}"),
            ColumnKind::Rolling { window } => format!("{base}_{window}d_ma"),
            ColumnKind::LagRolling { lag, window } => format!("{base}_lag{lag}_{window}d_ma"),
        }
    }

    /// Days between the most recent input value and the row it lands on
    pub fn lag(&self) -> usize {
        match self {
            ColumnKind::Base | ColumnKind::Rolling { .. } => 0,
            ColumnKind::Lag { lag } | ColumnKind::LagRolling { lag, .. } => *lag,
        }
    }
}

/// Registry entry for one column of a [`DerivedFeatureTable`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    /// Base metric the column is derived from
    pub base: String,
    pub kind: ColumnKind,
    /// False when every value is null (e.g. lag longer than history)
    pub usable: bool,
}

impl ColumnSpec {
    pub fn lag(&self) -> usize {
        self.kind.lag()
    }

    /// Same-day column: the base itself or a rolling mean that includes today
    pub fn is_same_day(&self) -> bool {
        self.lag() == 0
    }
}

/// Day-indexed table of base and derived columns with an explicit registry
#[derive(Debug, Clone, Default)]
pub struct DerivedFeatureTable {
    dates: Vec<NaiveDate>,
    registry: Vec<ColumnSpec>,
    index: HashMap<String, usize>,
    values: Vec<Vec<Option<f64>>>,
}

impl DerivedFeatureTable {
    pub(crate) fn new(dates: Vec<NaiveDate>) -> Self {
        Self {
            dates,
            ..Default::default()
        }
    }

    /// Register a column. Usability is computed from the values.
    pub(crate) fn push_column(
        &mut self,
        base: &str,
        kind: ColumnKind,
        values: Vec<Option<f64>>,
    ) -> Result<(), InsightError> {
        let name = kind.column_name(base);
        if self.index.contains_key(&name) {
            return Err(InsightError::Configuration(format!(
                "derived column name collides with an existing column: {name}"
            )));
        }
        if values.len() != self.dates.len() {
            return Err(InsightError::FeatureLength {
                column: name,
                expected: self.dates.len(),
                actual: values.len(),
            });
        }

        let usable = values.iter().any(|v| v.is_some());
        self.index.insert(name.clone(), self.registry.len());
        self.registry.push(ColumnSpec {
            name,
            base: base.to_string(),
            kind,
            usable,
        });
        self.values.push(values);
        Ok(())
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// All column specs in registration order
    pub fn specs(&self) -> &[ColumnSpec] {
        &self.registry
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> Result<&ColumnSpec, InsightError> {
        self.index
            .get(name)
            .map(|&i| &self.registry[i])
            .ok_or_else(|| InsightError::UnknownColumn(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Result<&[Option<f64>], InsightError> {
        self.index
            .get(name)
            .map(|&i| self.values[i].as_slice())
            .ok_or_else(|| InsightError::UnknownColumn(name.to_string()))
    }

    /// Base metric specs in registration order
    pub fn base_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.registry
            .iter()
            .filter(|s| matches!(s.kind, ColumnKind::Base))
    }

    pub fn usable_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.registry.iter().filter(|s| s.usable)
    }
}

/// Sign of an estimated effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sign {
    Positive,
    Negative,
    Zero,
}

impl Sign {
    pub fn of(value: f64) -> Self {
        if value > 0.0 {
            Sign::Positive
        } else if value < 0.0 {
            Sign::Negative
        } else {
            Sign::Zero
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Sign::Positive => 1.0,
            Sign::Negative => -1.0,
            Sign::Zero => 0.0,
        }
    }
}

/// One fitted slope of a per-target model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub feature: String,
    /// Base metric of the feature
    pub base: String,
    /// Lag embedded in the feature (0 for same-day columns)
    pub lag: usize,
    pub coefficient: f64,
    /// HAC-robust standard error
    pub std_error: f64,
    pub t_value: f64,
    pub p_value: f64,
    /// Sample SD of the feature over the fitted rows
    pub feature_sd: f64,
    /// Correlation-test p-value from screening, when the feature was screened in
    #[serde(default)]
    pub screening_p_value: Option<f64>,
}

impl Coefficient {
    /// p-value this coefficient enters false-discovery correction with.
    ///
    /// A screened-in feature must pass both its screening correlation and its
    /// fitted slope test, so the larger of the two p-values is used.
    pub fn family_p_value(&self) -> f64 {
        match self.screening_p_value {
            Some(screened) if !self.p_value.is_nan() && !screened.is_nan() => {
                self.p_value.max(screened)
            }
            _ => self.p_value,
        }
    }
}

/// A candidate correlated with the target during screening but not fitted.
///
/// Its test still counts toward the false-discovery family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenedCandidate {
    pub feature: String,
    pub r: f64,
    pub p_value: f64,
    /// Pairwise-complete observations
    pub n: usize,
}

/// Fitted explanatory model for one target metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub target: String,
    pub intercept: f64,
    /// Slopes in the order the features were selected
    pub coefficients: Vec<Coefficient>,
    pub r_squared: f64,
    /// May be negative; never clamped
    pub adj_r_squared: f64,
    pub aic: f64,
    /// Rows with no missing values among target and selected features
    pub n_obs: usize,
    pub df_resid: usize,
    /// Newey-West truncation lag used for the robust covariance
    pub hac_lags: usize,
    /// Sample SD of the target over the fitted rows
    pub target_sd: f64,
    /// Screened candidates left out of the fit
    #[serde(default)]
    pub screened_out: Vec<ScreenedCandidate>,
}

/// A (target, feature) hypothesis after multiple-testing correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedAssociation {
    pub target: String,
    pub feature: String,
    pub base: String,
    pub lag: usize,
    pub coefficient: f64,
    pub p_value: f64,
    pub q_value: f64,
    pub sign: Sign,
    /// |coefficient|
    pub effect_magnitude: f64,
    /// Coefficient in SD units of feature and target, when both SDs are positive
    pub standardized_effect: Option<f64>,
}

/// A target dropped from the ranked output, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmittedTarget {
    pub target: String,
    pub code: String,
    pub reason: String,
}

impl OmittedTarget {
    pub fn from_error(target: &str, error: &InsightError) -> Self {
        Self {
            target: target.to_string(),
            code: error.code().to_string(),
            reason: error.to_string(),
        }
    }
}
