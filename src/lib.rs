//! Synheart Insight - N-of-1 insight engine for daily health metrics
//!
//! Insight takes one subject's per-day metrics and runs a deterministic batch
//! pipeline: feature derivation → per-target robust regression → FDR
//! correction → correlation network → ranking → experiment design.
//!
//! ## Modules
//!
//! - **Analysis**: Ranked targets, significant predictors, primary levers and
//!   experiment designs ([`analyze_json`], [`InsightPipeline`])
//! - **Weekly report**: Descriptive week-over-week and population comparisons
//!   ([`WeeklyReport`])

pub mod config;
pub mod correction;
pub mod error;
pub mod experiment;
pub mod features;
pub mod model;
pub mod network;
pub mod pipeline;
pub mod ranker;
pub mod report;
pub mod schema;
pub mod stats;
pub mod types;
pub mod weekly;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::InsightConfig;
pub use error::InsightError;
pub use pipeline::{analyze, analyze_json, Analysis, InsightPipeline, InsightRun};

// Schema exports
pub use schema::{DailyRow, DailyRowAdapter, SCHEMA_VERSION};

// Report exports
pub use experiment::{ExperimentDesign, ExperimentDesigner, ExperimentOutcome};
pub use report::{ExperimentPlan, InsightReport, ReportEncoder};
pub use weekly::{ReferencePopulation, WeeklyReport};

/// Insight version embedded in every report
pub const INSIGHT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "synheart-insight";
