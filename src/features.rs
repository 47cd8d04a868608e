//! Feature derivation
//!
//! This module expands the canonical daily metrics table into the derived
//! feature table:
//! - Lag columns (`metric_lag{k}`)
//! - Trailing rolling means (`metric_{w}d_ma`)
//! - Rolling means of lag columns (`metric_lag{k}_{w}d_ma`)
//!
//! Every derived value depends only on its own row and earlier rows.

use crate::config::DEFAULT_MAX_CALENDAR_DAYS;
use crate::error::InsightError;
use crate::types::{ColumnKind, DerivedFeatureTable, MetricsTable};
use std::collections::BTreeSet;

/// Feature deriver for computing lagged and smoothed columns
pub struct FeatureDeriver;

impl FeatureDeriver {
    /// Derive the feature table.
    ///
    /// Fails with an ordering error when dates are unsorted or duplicated.
    /// Missing calendar days are materialised as null rows first, so a lag of
    /// k rows is always a lag of k days.
    pub fn derive(
        table: &MetricsTable,
        lags: &BTreeSet<usize>,
        windows: &BTreeSet<usize>,
    ) -> Result<DerivedFeatureTable, InsightError> {
        Self::derive_bounded(table, lags, windows, DEFAULT_MAX_CALENDAR_DAYS)
    }

    /// Derive the feature table for a history of at most `max_calendar_days` days
    pub fn derive_bounded(
        table: &MetricsTable,
        lags: &BTreeSet<usize>,
        windows: &BTreeSet<usize>,
        max_calendar_days: usize,
    ) -> Result<DerivedFeatureTable, InsightError> {
        if lags.contains(&0) {
            return Err(InsightError::Configuration(
                "lag must be at least 1 day".to_string(),
            ));
        }
        if let Some(w) = windows.iter().find(|&&w| w < 2) {
            return Err(InsightError::Configuration(format!(
                "rolling window must be at least 2 days, got {w}"
            )));
        }

        let calendar = table.fill_calendar_gaps(max_calendar_days)?;
        let mut derived = DerivedFeatureTable::new(calendar.dates().to_vec());

        for base in calendar.column_names() {
            let values = calendar.column(base)?;
            derived.push_column(base, ColumnKind::Base, values.to_vec())?;

            for &lag in lags {
                derived.push_column(base, ColumnKind::Lag { lag }, lag_column(values, lag))?;
            }

            for &window in windows {
                derived.push_column(
                    base,
                    ColumnKind::Rolling { window },
                    rolling_mean(values, window),
                )?;
            }

            for &lag in lags {
                let lagged = lag_column(values, lag);
                for &window in windows {
                    derived.push_column(
                        base,
                        ColumnKind::LagRolling { lag, window },
                        rolling_mean(&lagged, window),
                    )?;
                }
            }
        }

        Ok(derived)
    }
}

/// Shift values forward by `lag` rows; the first `lag` rows become null
pub fn lag_column(values: &[Option<f64>], lag: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| if i >= lag { values[i - lag] } else { None })
        .collect()
}

/// Trailing mean over `window` rows ending at each row.
///
/// Null unless all `window` trailing values are present.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            let mut sum = 0.0;
            for v in slice {
                sum += (*v)?;
            }
            Some(sum / window as f64)
        })
        .collect()
}
