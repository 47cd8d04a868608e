//! metrics.daily_row.v1 schema definition
//!
//! One record per subject-day. Metric names are free-form snake_case strings
//! (`rem_min`, `steps_sum`, `glucose_mean`); values are numbers or null.

use crate::types::DailyMetricsRow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current schema version
pub const SCHEMA_VERSION: &str = "metrics.daily_row.v1";

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

/// A single day of canonical metrics as delivered by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRow {
    /// Schema version; assumed current when omitted
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Calendar day (YYYY-MM-DD)
    pub date: NaiveDate,
    /// Optional subject identifier; all rows of one table must agree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    /// Metric values for the day
    #[serde(default)]
    pub metrics: BTreeMap<String, Option<f64>>,
}

impl DailyRow {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            date,
            subject_id: None,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: Option<f64>) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    /// Validate the row schema
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }

        for (name, value) in &self.metrics {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyMetricName);
            }
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(ValidationError::NonFiniteValue {
                        metric: name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Strip wire metadata, keeping the date and metric values
    pub fn into_metrics_row(self) -> DailyMetricsRow {
        DailyMetricsRow {
            date: self.date,
            metrics: self.metrics,
        }
    }
}

/// Validation errors for daily rows
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Metric name must not be empty")]
    EmptyMetricName,

    #[error("Metric '{metric}' has a non-finite value")]
    NonFiniteValue { metric: String },
}
