//! Error types for Synheart Insight

use thiserror::Error;

/// Errors that can occur during an insight batch run
#[derive(Debug, Error)]
pub enum InsightError {
    /// Input rows are unsorted or contain a duplicate date. Fatal.
    #[error("Ordering error: {0}")]
    Ordering(String),

    /// A single target cannot be fitted. The target is skipped, the run continues.
    #[error("Insufficient data for target '{target}': {reason}")]
    InsufficientData { target: String, reason: String },

    /// A column pair has too few overlapping observations. The pair is excluded.
    #[error("Degenerate correlation between '{a}' and '{b}': {overlap} paired observations, {required} required")]
    DegenerateCorrelation {
        a: String,
        b: String,
        overlap: usize,
        required: usize,
    },

    /// Invalid configuration values. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Column '{column}' has {actual} values, table has {expected} rows")]
    FeatureLength {
        column: String,
        expected: usize,
        actual: usize,
    },

    /// Design matrix is rank deficient (collinear or constant predictors)
    #[error("Singular design matrix for target '{target}'")]
    SingularDesign { target: String },

    /// A statistic has no defined value (zero variance, zero reference SD, ...)
    #[error("Undefined statistic: {0}")]
    UndefinedStatistic(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid daily row: {0}")]
    InvalidRow(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

impl InsightError {
    /// Whether this error only affects one target and the batch may continue
    pub fn is_per_target(&self) -> bool {
        matches!(
            self,
            InsightError::InsufficientData { .. } | InsightError::SingularDesign { .. }
        )
    }

    /// Short machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            InsightError::Ordering(_) => "ordering",
            InsightError::InsufficientData { .. } => "insufficient_data",
            InsightError::DegenerateCorrelation { .. } => "degenerate_correlation",
            InsightError::Configuration(_) => "configuration",
            InsightError::UnknownColumn(_) => "unknown_column",
            InsightError::FeatureLength { .. } => "feature_length",
            InsightError::SingularDesign { .. } => "singular_design",
            InsightError::UndefinedStatistic(_) => "undefined_statistic",
            InsightError::ParseError(_) => "parse_error",
            InsightError::JsonError(_) => "json_error",
            InsightError::InvalidRow(_) => "invalid_row",
            InsightError::EncodingError(_) => "encoding_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_target_classification() {
        let skip = InsightError::InsufficientData {
            target: "rem_min".to_string(),
            reason: "1 residual degree of freedom".to_string(),
        };
        assert!(skip.is_per_target());
        assert_eq!(skip.code(), "insufficient_data");

        let fatal = InsightError::Ordering("duplicate date 2024-01-03".to_string());
        assert!(!fatal.is_per_target());
    }

    #[test]
    fn test_display_includes_target() {
        let err = InsightError::SingularDesign {
            target: "hrv_mean".to_string(),
        };
        assert!(err.to_string().contains("hrv_mean"));
    }
}
