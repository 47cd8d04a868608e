//! Adapter for converting metrics.daily_row.v1 records into a MetricsTable
//!
//! Rows are kept in input order. Date ordering is checked by the feature
//! deriver, which fails on unsorted or duplicate dates instead of reordering.

use crate::error::InsightError;
use crate::schema::daily_row::*;
use crate::types::{DailyMetricsRow, MetricsTable};

/// Adapter for converting daily rows to the canonical table
pub struct DailyRowAdapter;

impl DailyRowAdapter {
    /// Parse a JSON string containing an array of DailyRows
    pub fn parse_array(json: &str) -> Result<Vec<DailyRow>, InsightError> {
        let rows: Vec<DailyRow> = serde_json::from_str(json)?;
        Ok(rows)
    }

    /// Parse NDJSON (newline-delimited JSON) containing DailyRows
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<DailyRow>, InsightError> {
        let mut rows = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<DailyRow>(trimmed) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    return Err(InsightError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(rows)
    }

    /// Parse either a JSON array or NDJSON, sniffing the first non-blank byte
    pub fn parse_auto(input: &str) -> Result<Vec<DailyRow>, InsightError> {
        if input.trim_start().starts_with('[') {
            Self::parse_array(input)
        } else {
            Self::parse_ndjson(input)
        }
    }

    /// Validate rows and assemble the canonical metrics table.
    ///
    /// Rows must all belong to one subject; pooling subjects is not supported.
    pub fn to_table(rows: Vec<DailyRow>) -> Result<MetricsTable, InsightError> {
        let mut subject: Option<String> = None;
        let mut metrics_rows: Vec<DailyMetricsRow> = Vec::with_capacity(rows.len());

        for (idx, row) in rows.into_iter().enumerate() {
            if let Err(e) = row.validate() {
                return Err(InsightError::InvalidRow(format!("row {idx} ({}): {e}", row.date)));
            }

            if let Some(id) = &row.subject_id {
                match &subject {
                    Some(existing) if existing != id => {
                        return Err(InsightError::InvalidRow(format!(
                            "row {idx} belongs to subject '{id}', table belongs to '{existing}'"
                        )));
                    }
                    Some(_) => {}
                    None => subject = Some(id.clone()),
                }
            }

            metrics_rows.push(row.into_metrics_row());
        }

        Ok(MetricsTable::from_rows(&metrics_rows))
    }

    /// Validate a batch of rows, returning only the failures
    pub fn validate_rows(rows: &[DailyRow]) -> Vec<ValidationResult> {
        rows.iter()
            .enumerate()
            .filter_map(|(idx, row)| {
                row.validate().err().map(|e| ValidationResult {
                    index: idx,
                    date: row.date.to_string(),
                    error: e,
                })
            })
            .collect()
    }
}

/// A failed row validation
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub date: String,
    pub error: ValidationError,
}
