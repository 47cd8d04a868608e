//! Run configuration
//!
//! All recognized options for one batch run, with defaults, JSON loading and
//! validation. Validation happens at load time so an invalid lever, lag or
//! threshold fails before any data is touched.

use crate::error::InsightError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Default lag set (days)
pub const DEFAULT_LAGS: [usize; 3] = [1, 2, 3];

/// Default rolling windows (days)
pub const DEFAULT_WINDOWS: [usize; 2] = [3, 7];

/// Default false-discovery-rate threshold
pub const DEFAULT_FDR_THRESHOLD: f64 = 0.05;

/// Default minimum paired observations for a correlation
pub const DEFAULT_MIN_PAIR_OVERLAP: usize = 10;

/// Default longest calendar span (days, inclusive) a table may cover
pub const DEFAULT_MAX_CALENDAR_DAYS: usize = 3660;

/// Subject-controllable behaviors that may be recommended as experiment levers.
///
/// Each variant maps to exactly one canonical metric name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lever {
    StepsSum,
    ExerciseMin,
    ActiveEnergySum,
    StandHoursSum,
    MindfulMin,
    DaylightMin,
    InBedMin,
    BedtimeHour,
    WakeHour,
    CaffeineMg,
    AlcoholUnits,
    CarbsG,
    ProteinG,
    FatG,
    FiberG,
    SugarG,
    CaloriesIn,
    LastMealHour,
    WaterMl,
    ScreenTimeMin,
}

impl Lever {
    pub const ALL: [Lever; 20] = [
        Lever::StepsSum,
        Lever::ExerciseMin,
        Lever::ActiveEnergySum,
        Lever::StandHoursSum,
        Lever::MindfulMin,
        Lever::DaylightMin,
        Lever::InBedMin,
        Lever::BedtimeHour,
        Lever::WakeHour,
        Lever::CaffeineMg,
        Lever::AlcoholUnits,
        Lever::CarbsG,
        Lever::ProteinG,
        Lever::FatG,
        Lever::FiberG,
        Lever::SugarG,
        Lever::CaloriesIn,
        Lever::LastMealHour,
        Lever::WaterMl,
        Lever::ScreenTimeMin,
    ];

    /// Canonical metric name of this lever
    pub fn as_str(&self) -> &'static str {
        match self {
            Lever::StepsSum => "steps_sum",
            Lever::ExerciseMin => "exercise_min",
            Lever::ActiveEnergySum => "active_energy_sum",
            Lever::StandHoursSum => "stand_hours_sum",
            Lever::MindfulMin => "mindful_min",
            Lever::DaylightMin => "daylight_min",
            Lever::InBedMin => "in_bed_min",
            Lever::BedtimeHour => "bedtime_hour",
            Lever::WakeHour => "wake_hour",
            Lever::CaffeineMg => "caffeine_mg",
            Lever::AlcoholUnits => "alcohol_units",
            Lever::CarbsG => "carbs_g",
            Lever::ProteinG => "protein_g",
            Lever::FatG => "fat_g",
            Lever::FiberG => "fiber_g",
            Lever::SugarG => "sugar_g",
            Lever::CaloriesIn => "calories_in",
            Lever::LastMealHour => "last_meal_hour",
            Lever::WaterMl => "water_ml",
            Lever::ScreenTimeMin => "screen_time_min",
        }
    }

    /// Look up the lever for a canonical metric name
    pub fn from_metric(name: &str) -> Option<Lever> {
        Lever::ALL.iter().copied().find(|l| l.as_str() == name)
    }
}

/// Confounders every experiment design must track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confounder {
    Illness,
    Travel,
    Caffeine,
    Alcohol,
    ExerciseIntensity,
    LateMeals,
    CyclePhase,
}

impl Confounder {
    pub const ALL: [Confounder; 7] = [
        Confounder::Illness,
        Confounder::Travel,
        Confounder::Caffeine,
        Confounder::Alcohol,
        Confounder::ExerciseIntensity,
        Confounder::LateMeals,
        Confounder::CyclePhase,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Confounder::Illness => "illness",
            Confounder::Travel => "travel",
            Confounder::Caffeine => "caffeine",
            Confounder::Alcohol => "alcohol",
            Confounder::ExerciseIntensity => "exercise intensity",
            Confounder::LateMeals => "late meals",
            Confounder::CyclePhase => "cycle phase",
        }
    }
}

/// Desired direction of change for a target metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalDirection {
    #[default]
    Increase,
    Decrease,
}

impl GoalDirection {
    pub fn as_f64(&self) -> f64 {
        match self {
            GoalDirection::Increase => 1.0,
            GoalDirection::Decrease => -1.0,
        }
    }
}

/// Hypothesis family used for false-discovery-rate correction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionFamily {
    /// One family across every (target, feature) pair of the run
    #[default]
    Pooled,
    /// One family per target
    PerTarget,
}

/// Which columns enter the correlation network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkScope {
    /// Original metrics only
    #[default]
    Base,
    /// Every usable column of the derived table
    All,
}

/// How often the subject records the goal metric during an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingCadence {
    #[default]
    Daily,
    Weekly,
}

/// Rules removing near-tautological predictors from a target's candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionRules {
    /// Exclude every same-day (lag 0) column, keeping only lagged predictors
    pub lagged_only: bool,
    /// Metric pairs whose same-day columns are near-deterministic of each other
    pub tautologies: Vec<(String, String)>,
}

impl Default for ExclusionRules {
    fn default() -> Self {
        let stages = ["core_min", "deep_min", "rem_min", "awake_min"];
        let mut tautologies: Vec<(String, String)> = stages
            .iter()
            .map(|s| ("total_min".to_string(), s.to_string()))
            .collect();
        tautologies.push(("in_bed_min".to_string(), "total_min".to_string()));
        Self {
            lagged_only: false,
            tautologies,
        }
    }
}

impl ExclusionRules {
    /// Whether same-day columns of `base` are tautological for `target`
    pub fn is_tautological(&self, target: &str, base: &str) -> bool {
        self.tautologies
            .iter()
            .any(|(a, b)| (a == target && b == base) || (a == base && b == target))
    }
}

/// Configuration for one insight batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    /// Lags in days for lag features
    pub lags: Vec<usize>,
    /// Rolling-mean windows in days
    pub windows: Vec<usize>,
    /// q-value threshold for significance
    pub fdr_threshold: f64,
    /// Minimum complete-case rows for a fit
    pub min_sample_size: usize,
    /// Minimum residual degrees of freedom for a fit
    pub min_residual_df: usize,
    /// Maximum predictors per target after screening
    pub max_features: usize,
    /// Newey-West truncation lag; rule of thumb when absent
    pub hac_max_lags: Option<usize>,
    /// Minimum paired observations for a correlation
    pub min_pair_overlap: usize,
    /// Neighbors retained per column and sign
    pub network_top_n: usize,
    pub network_scope: NetworkScope,
    /// Behavioral lever allow-list
    pub levers: Vec<Lever>,
    pub baseline_days: u32,
    pub intervention_days: u32,
    /// Recommended daily change as a fraction of the lever's daily SD
    pub dosage_fraction: f64,
    pub correction_family: CorrectionFamily,
    pub exclusion: ExclusionRules,
    /// Targets to model; every base metric when absent
    pub targets: Option<Vec<String>>,
    /// Longest span from first to last date, gap days included
    pub max_calendar_days: usize,
    /// Desired direction per target; increase when absent
    pub goals: BTreeMap<String, GoalDirection>,
    pub tracking_cadence: TrackingCadence,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            lags: DEFAULT_LAGS.to_vec(),
            windows: DEFAULT_WINDOWS.to_vec(),
            fdr_threshold: DEFAULT_FDR_THRESHOLD,
            min_sample_size: 10,
            min_residual_df: 2,
            max_features: 5,
            hac_max_lags: None,
            min_pair_overlap: DEFAULT_MIN_PAIR_OVERLAP,
            network_top_n: 5,
            network_scope: NetworkScope::Base,
            levers: Lever::ALL.to_vec(),
            baseline_days: 7,
            intervention_days: 7,
            dosage_fraction: 0.3,
            correction_family: CorrectionFamily::Pooled,
            exclusion: ExclusionRules::default(),
            targets: None,
            max_calendar_days: DEFAULT_MAX_CALENDAR_DAYS,
            goals: BTreeMap::new(),
            tracking_cadence: TrackingCadence::Daily,
        }
    }
}

impl InsightConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, InsightError> {
        let config: InsightConfig = serde_json::from_str(json)
            .map_err(|e| InsightError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_path(path: &Path) -> Result<Self, InsightError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            InsightError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Reject values that would make the run meaningless
    pub fn validate(&self) -> Result<(), InsightError> {
        if self.lags.is_empty() {
            return Err(InsightError::Configuration(
                "at least one lag is required".to_string(),
            ));
        }
        if let Some(lag) = self.lags.iter().find(|&&l| l == 0) {
            return Err(InsightError::Configuration(format!(
                "lag must be at least 1 day, got {lag}"
            )));
        }
        if let Some(window) = self.windows.iter().find(|&&w| w < 2) {
            return Err(InsightError::Configuration(format!(
                "rolling window must be at least 2 days, got {window}"
            )));
        }
        if !(self.fdr_threshold > 0.0 && self.fdr_threshold < 1.0) {
            return Err(InsightError::Configuration(format!(
                "fdr_threshold must be in (0, 1), got {}",
                self.fdr_threshold
            )));
        }
        if !(self.dosage_fraction > 0.0 && self.dosage_fraction <= 1.0) {
            return Err(InsightError::Configuration(format!(
                "dosage_fraction must be in (0, 1], got {}",
                self.dosage_fraction
            )));
        }
        if self.min_residual_df < 2 {
            return Err(InsightError::Configuration(
                "min_residual_df must be at least 2".to_string(),
            ));
        }
        if self.min_sample_size < 3 {
            return Err(InsightError::Configuration(
                "min_sample_size must be at least 3".to_string(),
            ));
        }
        if self.max_features == 0 {
            return Err(InsightError::Configuration(
                "max_features must be at least 1".to_string(),
            ));
        }
        if self.min_pair_overlap < 3 {
            return Err(InsightError::Configuration(
                "min_pair_overlap must be at least 3".to_string(),
            ));
        }
        if self.max_calendar_days == 0 {
            return Err(InsightError::Configuration(
                "max_calendar_days must be at least 1".to_string(),
            ));
        }
        if self.network_top_n == 0 {
            return Err(InsightError::Configuration(
                "network_top_n must be at least 1".to_string(),
            ));
        }
        if self.baseline_days == 0 || self.intervention_days == 0 {
            return Err(InsightError::Configuration(
                "baseline_days and intervention_days must be at least 1".to_string(),
            ));
        }
        if let Some(targets) = &self.targets {
            if targets.iter().any(|t| t.trim().is_empty()) {
                return Err(InsightError::Configuration(
                    "target names must not be empty".to_string(),
                ));
            }
        }
        if let Some((a, b)) = self.exclusion.tautologies.iter().find(|(a, b)| a == b) {
            return Err(InsightError::Configuration(format!(
                "tautology pair must name two metrics, got ({a}, {b})"
            )));
        }
        Ok(())
    }

    /// Deduplicated, ascending lags
    pub fn lag_set(&self) -> BTreeSet<usize> {
        self.lags.iter().copied().collect()
    }

    /// Deduplicated, ascending windows
    pub fn window_set(&self) -> BTreeSet<usize> {
        self.windows.iter().copied().collect()
    }

    pub fn lever_set(&self) -> BTreeSet<Lever> {
        self.levers.iter().copied().collect()
    }

    /// Whether a base metric is on the lever allow-list
    pub fn is_lever(&self, base: &str) -> bool {
        Lever::from_metric(base).is_some_and(|l| self.levers.contains(&l))
    }

    pub fn goal_for(&self, target: &str) -> GoalDirection {
        self.goals.get(target).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = InsightConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lag_set().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(config.window_set().into_iter().collect::<Vec<_>>(), vec![3, 7]);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = InsightConfig::from_json(r#"{"lags": [1, 7], "fdr_threshold": 0.1}"#).unwrap();
        assert_eq!(config.lags, vec![1, 7]);
        assert!((config.fdr_threshold - 0.1).abs() < 1e-12);
        assert_eq!(config.windows, DEFAULT_WINDOWS.to_vec());
        assert_eq!(config.baseline_days, 7);
    }

    #[test]
    fn test_unknown_lever_fails_at_load() {
        let result = InsightConfig::from_json(r#"{"levers": ["steps_sum", "rem_min"]}"#);
        assert!(matches!(result, Err(InsightError::Configuration(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for json in [
            r#"{"lags": [0, 1]}"#,
            r#"{"lags": []}"#,
            r#"{"windows": [1]}"#,
            r#"{"fdr_threshold": 1.5}"#,
            r#"{"dosage_fraction": 0.0}"#,
            r#"{"baseline_days": 0}"#,
            r#"{"min_residual_df": 1}"#,
            r#"{"max_calendar_days": 0}"#,
            r#"{"exclusion": {"tautologies": [["rem_min", "rem_min"]]}}"#,
        ] {
            assert!(
                matches!(InsightConfig::from_json(json), Err(InsightError::Configuration(_))),
                "expected rejection for {json}"
            );
        }
    }

    #[test]
    fn test_lever_lookup() {
        let config = InsightConfig {
            levers: vec![Lever::StepsSum, Lever::CaffeineMg],
            ..Default::default()
        };
        assert!(config.is_lever("steps_sum"));
        assert!(config.is_lever("caffeine_mg"));
        assert!(!config.is_lever("alcohol_units"));
        assert!(!config.is_lever("rem_min"));
        assert_eq!(Lever::from_metric("water_ml"), Some(Lever::WaterMl));
    }

    #[test]
    fn test_tautology_is_symmetric() {
        let rules = ExclusionRules::default();
        assert!(rules.is_tautological("total_min", "core_min"));
        assert!(rules.is_tautological("core_min", "total_min"));
        assert!(!rules.is_tautological("core_min", "steps_sum"));
    }

    #[test]
    fn test_goal_defaults_to_increase() {
        let mut config = InsightConfig::default();
        config
            .goals
            .insert("resting_hr_mean".to_string(), GoalDirection::Decrease);
        assert_eq!(config.goal_for("resting_hr_mean"), GoalDirection::Decrease);
        assert_eq!(config.goal_for("rem_min"), GoalDirection::Increase);
    }

    #[test]
    fn test_lever_serde_names_match_metric_names() {
        for lever in Lever::ALL {
            let json = serde_json::to_string(&lever).unwrap();
            assert_eq!(json, format!("\"{}\"", lever.as_str()));
        }
    }
}
