//! Report encoding
//!
//! This module turns a finished [`InsightRun`] into the two structured outputs
//! consumed downstream, the insight report and the experiment plan, and
//! renders them (and the weekly report) as plain text for terminals.

use crate::config::{CorrectionFamily, InsightConfig, NetworkScope};
use crate::correction::hypothesis_count;
use crate::error::InsightError;
use crate::experiment::{ChangeDirection, ExperimentDesign};
use crate::network::{Neighbor, Neighbors};
use crate::pipeline::InsightRun;
use crate::ranker::{RankedPredictor, RankedTarget};
use crate::types::OmittedTarget;
use crate::weekly::{Statistic, WeeklyReport};
use crate::{INSIGHT_VERSION, PRODUCER_NAME};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;
use uuid::Uuid;

/// Current report schema version
pub const REPORT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub run_id: String,
}

/// Ranked predictors of one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPredictors {
    pub target: String,
    pub predictors: Vec<RankedPredictor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub scope: NetworkScope,
    pub pairs_retained: usize,
    pub pairs_excluded: usize,
    pub neighbors: BTreeMap<String, Neighbors>,
}

/// Ranked targets, their predictors and the correlation network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightReport {
    pub report_version: String,
    pub producer: ReportProducer,
    pub computed_at_utc: String,
    pub rows: usize,
    pub derived_columns: usize,
    pub correction_family: CorrectionFamily,
    pub fdr_threshold: f64,
    /// Hypotheses in the correction, screened-out candidates included
    #[serde(default)]
    pub hypotheses_tested: usize,
    pub config: InsightConfig,
    pub ranked_targets: Vec<RankedTarget>,
    pub predictors: Vec<TargetPredictors>,
    pub network: NetworkSummary,
    pub omitted_targets: Vec<OmittedTarget>,
}

/// One experiment design per target with a primary lever
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentPlan {
    pub report_version: String,
    pub producer: ReportProducer,
    pub computed_at_utc: String,
    pub designs: Vec<ExperimentDesign>,
    /// Targets whose primary lever could not be turned into a design
    pub skipped: Vec<OmittedTarget>,
}

/// Encoder for insight reports and experiment plans
pub struct ReportEncoder {
    run_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique run ID
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific run ID
    pub fn with_run_id(run_id: String) -> Self {
        Self { run_id }
    }

    fn producer(&self) -> ReportProducer {
        ReportProducer {
            name: PRODUCER_NAME.to_string(),
            version: INSIGHT_VERSION.to_string(),
            run_id: self.run_id.clone(),
        }
    }

    pub fn encode_report(&self, run: &InsightRun) -> InsightReport {
        // Predictors follow the target ranking
        let predictors = run
            .ranked_targets
            .iter()
            .map(|t| TargetPredictors {
                target: t.target.clone(),
                predictors: run.predictors.get(&t.target).cloned().unwrap_or_default(),
            })
            .collect();

        InsightReport {
            report_version: REPORT_VERSION.to_string(),
            producer: self.producer(),
            computed_at_utc: Utc::now().to_rfc3339(),
            rows: run.rows,
            derived_columns: run.derived_columns,
            correction_family: run.config.correction_family,
            fdr_threshold: run.config.fdr_threshold,
            hypotheses_tested: hypothesis_count(&run.models),
            config: run.config.clone(),
            ranked_targets: run.ranked_targets.clone(),
            predictors,
            network: NetworkSummary {
                scope: run.config.network_scope,
                pairs_retained: run.network.edges.len(),
                pairs_excluded: run.network.excluded.len(),
                neighbors: run.network.neighbors.clone(),
            },
            omitted_targets: run.omitted.clone(),
        }
    }

    pub fn encode_plan(&self, run: &InsightRun) -> ExperimentPlan {
        ExperimentPlan {
            report_version: REPORT_VERSION.to_string(),
            producer: self.producer(),
            computed_at_utc: Utc::now().to_rfc3339(),
            designs: run.designs.clone(),
            skipped: run.undesigned.clone(),
        }
    }
}

/// Encode any output as pretty or compact JSON
pub fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String, InsightError> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}

/// Plain-text insight report. Primary levers are starred.
pub fn render_report_text(report: &InsightReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Insight report ({} rows, {} derived columns, {:?} FDR family of {}, q < {})",
        report.rows,
        report.derived_columns,
        report.correction_family,
        report.hypotheses_tested,
        report.fdr_threshold
    );

    let _ = writeln!(out, "\nTargets by adjusted R²:");
    if report.ranked_targets.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for t in &report.ranked_targets {
        let _ = writeln!(
            out,
            "  {:>2}. {:<24} adjR²={:>7.3}  R²={:.3}  AIC={:.1}  n={}",
            t.rank, t.target, t.adj_r_squared, t.r_squared, t.aic, t.n_obs
        );
    }

    for group in &report.predictors {
        let _ = writeln!(out, "\nPredictors of {}:", group.target);
        if group.predictors.is_empty() {
            let _ = writeln!(out, "  (none below threshold)");
        }
        for p in &group.predictors {
            let star = if p.primary { " *" } else { "" };
            let _ = writeln!(
                out,
                "  {:<32} coef={:>+10.4}  q={:.4}{}",
                p.feature, p.coefficient, p.q_value, star
            );
        }
    }

    let _ = writeln!(
        out,
        "\nCorrelation network: {} pairs, {} excluded",
        report.network.pairs_retained, report.network.pairs_excluded
    );
    for (column, n) in &report.network.neighbors {
        if n.positive.is_empty() && n.negative.is_empty() {
            continue;
        }
        let fmt = |list: &[Neighbor]| {
            list.iter()
                .map(|x| format!("{} ({:+.2})", x.column, x.r))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let _ = writeln!(out, "  {column}");
        if !n.positive.is_empty() {
            let _ = writeln!(out, "    + {}", fmt(&n.positive));
        }
        if !n.negative.is_empty() {
            let _ = writeln!(out, "    - {}", fmt(&n.negative));
        }
    }

    if !report.omitted_targets.is_empty() {
        let _ = writeln!(out, "\nOmitted targets:");
        for o in &report.omitted_targets {
            let _ = writeln!(out, "  {} [{}]: {}", o.target, o.code, o.reason);
        }
    }

    out
}

/// Plain-text experiment plan
pub fn render_plan_text(plan: &ExperimentPlan) -> String {
    let mut out = String::new();
    if plan.designs.is_empty() {
        let _ = writeln!(out, "No experiments: no target has a significant lever.");
    }

    for d in &plan.designs {
        let verb = match d.dosage.direction {
            ChangeDirection::Increase => "Increase",
            ChangeDirection::Decrease => "Decrease",
        };
        let _ = writeln!(out, "Experiment: {} ({:?})", d.target, d.goal);
        let _ = writeln!(
            out,
            "  Lever: {} via {} (coef {:+.4}, q {:.4})",
            d.lever.as_str(),
            d.feature,
            d.coefficient,
            d.q_value
        );
        let _ = writeln!(
            out,
            "  {verb} {} by {:.1} per day ({:.0}% of its daily SD)",
            d.lever.as_str(),
            d.dosage.magnitude,
            d.dosage.fraction_of_sd * 100.0
        );
        let _ = writeln!(out, "  Expect an effect after {} day(s)", d.expected_delay_days);
        let _ = writeln!(
            out,
            "  Design: {} baseline days then {} intervention days, tracked {:?}",
            d.baseline_days, d.intervention_days, d.tracking_cadence
        );
        let _ = writeln!(
            out,
            "  Success: {} on {} at alpha {}",
            d.success_criterion.test, d.success_criterion.metric, d.success_criterion.alpha
        );
        let confounders: Vec<&str> = d.confounders.iter().map(|c| c.label()).collect();
        let _ = writeln!(out, "  Track confounders: {}", confounders.join(", "));
        let _ = writeln!(out);
    }

    for s in &plan.skipped {
        let _ = writeln!(out, "Skipped {}: {}", s.target, s.reason);
    }

    out
}

/// Plain-text weekly report
pub fn render_weekly_text(report: &WeeklyReport) -> String {
    fn show(stat: &Statistic, suffix: &str) -> String {
        match stat {
            Statistic::Value { value } => format!("{value:.1}{suffix}"),
            Statistic::Undefined { .. } => "undefined".to_string(),
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "Week {} to {}", report.week_start, report.week_end);
    for m in &report.metrics {
        let _ = writeln!(
            out,
            "  {:<24} value={:<10} vs self={:<10} percentile={}",
            m.metric,
            show(&m.value, ""),
            show(&m.pct_change_vs_self, "%"),
            show(&m.percentile_vs_population, "")
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Confounder, GoalDirection, Lever, TrackingCadence};
    use crate::experiment::{Dosage, SuccessCriterion};
    use crate::network::CorrelationNetwork;

    fn sample_run() -> InsightRun {
        let config = InsightConfig::default();
        let predictor = RankedPredictor {
            feature: "steps_sum_lag1".to_string(),
            base: "steps_sum".to_string(),
            lag: 1,
            coefficient: 0.002,
            p_value: 0.0001,
            q_value: 0.0004,
            is_lever: true,
            primary: true,
        };
        let design = ExperimentDesign {
            target: "hrv_mean".to_string(),
            goal: GoalDirection::Increase,
            lever: Lever::StepsSum,
            feature: "steps_sum_lag1".to_string(),
            lag: 1,
            coefficient: 0.002,
            q_value: 0.0004,
            dosage: Dosage {
                magnitude: 600.0,
                direction: ChangeDirection::Increase,
                lever_sd: 2000.0,
                fraction_of_sd: 0.3,
            },
            expected_delay_days: 1,
            baseline_days: 7,
            intervention_days: 7,
            tracking_cadence: TrackingCadence::Daily,
            success_criterion: SuccessCriterion {
                test: "welch_t_test".to_string(),
                metric: "hrv_mean".to_string(),
                alpha: 0.05,
                expected_direction: GoalDirection::Increase,
            },
            confounders: Confounder::ALL.to_vec(),
        };

        InsightRun {
            config,
            rows: 21,
            derived_columns: 12,
            models: Vec::new(),
            associations: Vec::new(),
            ranked_targets: vec![RankedTarget {
                rank: 1,
                target: "hrv_mean".to_string(),
                r_squared: 0.98,
                adj_r_squared: 0.979,
                aic: 20.5,
                n_obs: 20,
            }],
            predictors: [("hrv_mean".to_string(), vec![predictor])].into_iter().collect(),
            network: CorrelationNetwork::default(),
            omitted: vec![OmittedTarget {
                target: "glucose_mean".to_string(),
                code: "insufficient_data".to_string(),
                reason: "no usable candidate features".to_string(),
            }],
            designs: vec![design],
            undesigned: Vec::new(),
        }
    }

    #[test]
    fn test_encode_report() {
        let encoder = ReportEncoder::with_run_id("run-1".to_string());
        let report = encoder.encode_report(&sample_run());

        assert_eq!(report.producer.name, PRODUCER_NAME);
        assert_eq!(report.producer.run_id, "run-1");
        assert_eq!(report.correction_family, CorrectionFamily::Pooled);
        assert_eq!(report.predictors[0].target, "hrv_mean");
        assert!(report.predictors[0].predictors[0].primary);
        assert_eq!(report.omitted_targets.len(), 1);

        let json = to_json(&report, false).unwrap();
        assert!(json.contains("\"correction_family\":\"pooled\""));
        assert!(json.contains("\"omitted_targets\""));
        let back: InsightReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ranked_targets, report.ranked_targets);
    }

    #[test]
    fn test_encode_plan() {
        let plan = ReportEncoder::new().encode_plan(&sample_run());
        assert_eq!(plan.designs.len(), 1);
        assert!(!plan.producer.run_id.is_empty());

        let json = to_json(&plan, true).unwrap();
        assert!(json.contains("\"lever\": \"steps_sum\""));
        assert!(json.contains("cycle_phase"));
    }

    #[test]
    fn test_text_rendering() {
        let run = sample_run();
        let encoder = ReportEncoder::new();

        let text = render_report_text(&encoder.encode_report(&run));
        assert!(text.contains("hrv_mean"));
        assert!(text.contains("steps_sum_lag1"));
        assert!(text.contains(" *"));
        assert!(text.contains("glucose_mean [insufficient_data]"));

        let plan = render_plan_text(&encoder.encode_plan(&run));
        assert!(plan.contains("Increase steps_sum by 600.0 per day (30% of its daily SD)"));
        assert!(plan.contains("late meals"));
    }
}
