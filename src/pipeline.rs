//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Insight.
//! It runs one batch pass over a subject's history.
//!
//! Pipeline stages:
//! 1. FeatureDeriver - Lags, rolling means and their compositions
//! 2. TargetModeler - One robust regression per target (fan-out)
//! 3. correct_associations - FDR correction once every fit has finished
//! 4. CorrelationNetwork - Pairwise correlations as a separate family
//! 5. Ranker - Targets by model quality, predictors by q and effect size
//! 6. ExperimentDesigner - One design per target with a primary lever

use crate::config::InsightConfig;
use crate::correction::{correct_associations, hypothesis_count};
use crate::error::InsightError;
use crate::experiment::{ExperimentDesign, ExperimentDesigner};
use crate::features::FeatureDeriver;
use crate::model::TargetModeler;
use crate::network::CorrelationNetwork;
use crate::ranker::{primary_lever, rank_predictors, rank_targets, RankedPredictor, RankedTarget};
use crate::report::{ExperimentPlan, InsightReport, ReportEncoder};
use crate::schema::DailyRowAdapter;
use crate::types::{
    CorrectedAssociation, DerivedFeatureTable, MetricsTable, ModelResult, OmittedTarget,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Everything one batch run produced. Each stage's output is kept as-is.
#[derive(Debug, Clone)]
pub struct InsightRun {
    pub config: InsightConfig,
    pub rows: usize,
    pub derived_columns: usize,
    pub models: Vec<ModelResult>,
    pub associations: Vec<CorrectedAssociation>,
    pub ranked_targets: Vec<RankedTarget>,
    pub predictors: BTreeMap<String, Vec<RankedPredictor>>,
    pub network: CorrelationNetwork,
    /// Targets absent from the ranking, with the reason
    pub omitted: Vec<OmittedTarget>,
    pub designs: Vec<ExperimentDesign>,
    /// Targets with a primary lever whose design could not be computed
    pub undesigned: Vec<OmittedTarget>,
}

/// Batch pipeline for one subject's table
pub struct InsightPipeline {
    config: InsightConfig,
}

impl InsightPipeline {
    /// Create a pipeline; the configuration is validated up front
    pub fn new(config: InsightConfig) -> Result<Self, InsightError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &InsightConfig {
        &self.config
    }

    /// Run every stage over `table`.
    ///
    /// Ordering and configuration errors abort the run. Targets that cannot be
    /// fitted are reported in `omitted` and the run continues.
    pub fn run(&self, table: &MetricsTable) -> Result<InsightRun, InsightError> {
        let config = &self.config;
        info!(
            "insight run: {} rows, {} metrics",
            table.len(),
            table.column_names().count()
        );

        for lever in &config.levers {
            if !table.has_column(lever.as_str()) {
                debug!("lever {} not present in table", lever.as_str());
            }
        }

        // Stage 1: Derive features
        let derived = FeatureDeriver::derive_bounded(
            table,
            &config.lag_set(),
            &config.window_set(),
            config.max_calendar_days,
        )?;
        info!(
            "derived {} columns over {} days",
            derived.specs().len(),
            derived.len()
        );

        let (targets, mut omitted) = self.select_targets(&derived);

        // Stage 2: Fit each target independently
        let modeler = TargetModeler::new(config);
        let fit_one = |target: &String| (target.clone(), modeler.fit_screened(&derived, target));

        #[cfg(feature = "parallel")]
        let outcomes: Vec<(String, Result<ModelResult, InsightError>)> =
            targets.par_iter().map(fit_one).collect();
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<(String, Result<ModelResult, InsightError>)> =
            targets.iter().map(fit_one).collect();

        // Barrier: every fit has completed
        let mut models = Vec::with_capacity(outcomes.len());
        for (target, outcome) in outcomes {
            match outcome {
                Ok(model) => models.push(model),
                Err(e) if e.is_per_target() => {
                    warn!("skipping target {target}: {e}");
                    omitted.push(OmittedTarget::from_error(&target, &e));
                }
                Err(e) => return Err(e),
            }
        }
        omitted.sort_by(|a, b| a.target.cmp(&b.target));

        // Stage 3: Correct
        let associations = correct_associations(&models, config.correction_family);
        info!(
            "corrected {} coefficients over {} hypotheses",
            associations.len(),
            hypothesis_count(&models)
        );

        // Stage 4: Correlation network
        let network = CorrelationNetwork::build(&derived, config)?;
        info!(
            "correlation network: {} pairs retained, {} excluded",
            network.edges.len(),
            network.excluded.len()
        );

        // Stage 5: Rank
        let ranked_targets = rank_targets(&models);
        let predictors: BTreeMap<String, Vec<RankedPredictor>> = ranked_targets
            .iter()
            .map(|t| {
                (
                    t.target.clone(),
                    rank_predictors(&t.target, &associations, config),
                )
            })
            .collect();

        // Stage 6: Design experiments
        let (designs, undesigned) =
            design_experiments(&derived, &ranked_targets, &associations, config);

        info!(
            "insight run complete: {} targets ranked, {} omitted, {} experiments",
            ranked_targets.len(),
            omitted.len(),
            designs.len()
        );

        Ok(InsightRun {
            config: config.clone(),
            rows: derived.len(),
            derived_columns: derived.specs().len(),
            models,
            associations,
            ranked_targets,
            predictors,
            network,
            omitted,
            designs,
            undesigned,
        })
    }

    /// Configured targets, or every base metric; unknown or empty ones are omitted
    fn select_targets(&self, derived: &DerivedFeatureTable) -> (Vec<String>, Vec<OmittedTarget>) {
        let requested: Vec<String> = match &self.config.targets {
            Some(list) => list.clone(),
            None => derived.base_columns().map(|s| s.name.clone()).collect(),
        };

        let mut targets = Vec::new();
        let mut omitted = Vec::new();
        for name in requested {
            match derived.spec(&name) {
                Ok(spec) if spec.usable => targets.push(name),
                Ok(_) => {
                    let e = InsightError::InsufficientData {
                        target: name.clone(),
                        reason: "no observations".to_string(),
                    };
                    warn!("skipping target {name}: {e}");
                    omitted.push(OmittedTarget::from_error(&name, &e));
                }
                Err(e) => {
                    warn!("skipping target {name}: {e}");
                    omitted.push(OmittedTarget::from_error(&name, &e));
                }
            }
        }
        (targets, omitted)
    }
}

fn design_experiments(
    derived: &DerivedFeatureTable,
    ranked: &[RankedTarget],
    associations: &[CorrectedAssociation],
    config: &InsightConfig,
) -> (Vec<ExperimentDesign>, Vec<OmittedTarget>) {
    let designer = ExperimentDesigner::new(config);
    let mut designs = Vec::new();
    let mut undesigned = Vec::new();

    for target in ranked {
        let association = match primary_lever(&target.target, associations, config) {
            Some(a) => a,
            None => continue,
        };
        let outcome = ExperimentDesigner::lever_sd(derived, &association.base)
            .and_then(|sd| designer.design(association, sd));
        match outcome {
            Ok(design) => designs.push(design),
            Err(e) => {
                warn!("no experiment for {}: {e}", target.target);
                undesigned.push(OmittedTarget::from_error(&target.target, &e));
            }
        }
    }

    (designs, undesigned)
}

/// Report and plan produced together by one analysis
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub report: InsightReport,
    pub plan: ExperimentPlan,
}

/// Analyze daily rows (JSON array or NDJSON) with an optional JSON configuration.
///
/// # Returns
/// Pretty JSON object with `report` and `plan`
///
/// # Example
/// ```ignore
/// let json = analyze_json(rows_ndjson, Some(r#"{"lags": [1, 2]}"#))?;
/// ```
pub fn analyze_json(rows: &str, config_json: Option<&str>) -> Result<String, InsightError> {
    let analysis = analyze(rows, config_json)?;
    Ok(serde_json::to_string_pretty(&analysis)?)
}

/// Parse, run and encode in one call
pub fn analyze(rows: &str, config_json: Option<&str>) -> Result<Analysis, InsightError> {
    let config = match config_json {
        Some(json) => InsightConfig::from_json(json)?,
        None => InsightConfig::default(),
    };
    let table = DailyRowAdapter::to_table(DailyRowAdapter::parse_auto(rows)?)?;
    let run = InsightPipeline::new(config)?.run(&table)?;

    let encoder = ReportEncoder::new();
    Ok(Analysis {
        report: encoder.encode_report(&run),
        plan: encoder.encode_plan(&run),
    })
}
