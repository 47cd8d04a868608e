//! Insight CLI - Command-line interface for Synheart Insight
//!
//! Commands:
//! - analyze: Rank targets and predictors, build the network, design experiments
//! - weekly: Weekly descriptive report
//! - validate: Validate daily row schema
//! - doctor: Diagnose configuration and environment
//! - schema: Print input, output or configuration schema

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use synheart_insight::config::{CorrectionFamily, InsightConfig, NetworkScope};
use synheart_insight::pipeline::{Analysis, InsightPipeline};
use synheart_insight::report::{
    render_plan_text, render_report_text, render_weekly_text, to_json, ReportEncoder,
};
use synheart_insight::schema::{DailyRow, DailyRowAdapter, SCHEMA_VERSION};
use synheart_insight::weekly::{ReferencePopulation, WeeklyReport};
use synheart_insight::{InsightError, INSIGHT_VERSION, PRODUCER_NAME};

/// Insight - N-of-1 insight engine for daily health metrics
#[derive(Parser)]
#[command(name = "insight")]
#[command(author = "Synheart AI Inc")]
#[command(version = INSIGHT_VERSION)]
#[command(about = "Discover lagged drivers of daily health metrics and design experiments", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a subject's daily history
    Analyze {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "auto")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Lags in days (overrides config)
        #[arg(long, value_delimiter = ',')]
        lags: Option<Vec<usize>>,

        /// Rolling windows in days (overrides config)
        #[arg(long, value_delimiter = ',')]
        windows: Option<Vec<usize>>,

        /// FDR threshold (overrides config)
        #[arg(long)]
        fdr_threshold: Option<f64>,

        /// Targets to model (overrides config)
        #[arg(long, value_delimiter = ',')]
        targets: Option<Vec<String>>,

        /// Hypothesis family for FDR correction (overrides config)
        #[arg(long)]
        correction_family: Option<FamilyArg>,

        /// Columns entering the correlation network (overrides config)
        #[arg(long)]
        network_scope: Option<ScopeArg>,
    },

    /// Weekly descriptive report
    Weekly {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Reference population JSON ({"metric": {"mean": .., "sd": ..}})
        #[arg(short, long)]
        references: Option<PathBuf>,

        /// Last day of the report week (YYYY-MM-DD); latest date in the input when absent
        #[arg(long)]
        week_end: Option<NaiveDate>,

        /// Input format
        #[arg(long, default_value = "auto")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Validate daily row schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "auto")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check a configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Detect from the first character
    Auto,
    /// Newline-delimited JSON (one row per line)
    Ndjson,
    /// JSON array of rows
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Human-readable text
    Text,
}

#[derive(Clone, ValueEnum)]
enum FamilyArg {
    Pooled,
    PerTarget,
}

#[derive(Clone, ValueEnum)]
enum ScopeArg {
    Base,
    All,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (metrics.daily_row.v1)
    Input,
    /// Output schema (insight report and experiment plan)
    Output,
    /// Configuration options and defaults
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), InsightCliError> {
    match cli.command {
        Commands::Analyze {
            input,
            output,
            input_format,
            output_format,
            config,
            lags,
            windows,
            fdr_threshold,
            targets,
            correction_family,
            network_scope,
        } => {
            let mut cfg = match config {
                Some(path) => InsightConfig::from_path(&path)?,
                None => InsightConfig::default(),
            };
            if let Some(lags) = lags {
                cfg.lags = lags;
            }
            if let Some(windows) = windows {
                cfg.windows = windows;
            }
            if let Some(threshold) = fdr_threshold {
                cfg.fdr_threshold = threshold;
            }
            if let Some(targets) = targets {
                cfg.targets = Some(targets);
            }
            if let Some(family) = correction_family {
                cfg.correction_family = match family {
                    FamilyArg::Pooled => CorrectionFamily::Pooled,
                    FamilyArg::PerTarget => CorrectionFamily::PerTarget,
                };
            }
            if let Some(scope) = network_scope {
                cfg.network_scope = match scope {
                    ScopeArg::Base => NetworkScope::Base,
                    ScopeArg::All => NetworkScope::All,
                };
            }
            cmd_analyze(&input, &output, input_format, output_format, cfg)
        }

        Commands::Weekly {
            input,
            references,
            week_end,
            input_format,
            output_format,
        } => cmd_weekly(
            &input,
            references.as_deref(),
            week_end,
            input_format,
            output_format,
        ),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

fn read_input(input: &Path) -> Result<String, InsightCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn parse_rows(data: &str, format: InputFormat) -> Result<Vec<DailyRow>, InsightCliError> {
    let rows = match format {
        InputFormat::Auto => DailyRowAdapter::parse_auto(data)?,
        InputFormat::Ndjson => DailyRowAdapter::parse_ndjson(data)?,
        InputFormat::Json => DailyRowAdapter::parse_array(data)?,
    };
    if rows.is_empty() {
        return Err(InsightCliError::NoRows);
    }
    Ok(rows)
}

fn write_output(output: &Path, data: &str) -> Result<(), InsightCliError> {
    if output.to_string_lossy() == "-" {
        println!("{data}");
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn cmd_analyze(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: InsightConfig,
) -> Result<(), InsightCliError> {
    let rows = parse_rows(&read_input(input)?, input_format)?;
    let table = DailyRowAdapter::to_table(rows)?;

    let run = InsightPipeline::new(config)?.run(&table)?;
    let encoder = ReportEncoder::new();
    let analysis = Analysis {
        report: encoder.encode_report(&run),
        plan: encoder.encode_plan(&run),
    };

    let data = match output_format {
        OutputFormat::Json => to_json(&analysis, false)?,
        OutputFormat::JsonPretty => to_json(&analysis, true)?,
        OutputFormat::Text => format!(
            "{}\n{}",
            render_report_text(&analysis.report),
            render_plan_text(&analysis.plan)
        ),
    };
    write_output(output, &data)
}

fn cmd_weekly(
    input: &Path,
    references: Option<&Path>,
    week_end: Option<NaiveDate>,
    input_format: InputFormat,
    output_format: OutputFormat,
) -> Result<(), InsightCliError> {
    let rows = parse_rows(&read_input(input)?, input_format)?;
    let table = DailyRowAdapter::to_table(rows)?;

    let references = match references {
        Some(path) => ReferencePopulation::from_json(&fs::read_to_string(path)?)?,
        None => ReferencePopulation::new(),
    };
    let week_end = match week_end.or_else(|| table.dates().iter().max().copied()) {
        Some(d) => d,
        None => return Err(InsightCliError::NoRows),
    };

    let report = WeeklyReport::build(&table, week_end, &references)?;
    let data = match output_format {
        OutputFormat::Json => to_json(&report, false)?,
        OutputFormat::JsonPretty => to_json(&report, true)?,
        OutputFormat::Text => render_weekly_text(&report),
    };
    write_output(Path::new("-"), &data)
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), InsightCliError> {
    let data = read_input(input)?;
    let rows = match input_format {
        InputFormat::Auto => DailyRowAdapter::parse_auto(&data)?,
        InputFormat::Ndjson => DailyRowAdapter::parse_ndjson(&data)?,
        InputFormat::Json => DailyRowAdapter::parse_array(&data)?,
    };

    let failures = DailyRowAdapter::validate_rows(&rows);
    let order_error = DailyRowAdapter::to_table(rows.clone())
        .and_then(|t| t.validate_order())
        .err()
        .filter(|e| matches!(e, InsightError::Ordering(_)))
        .map(|e| e.to_string());

    let report = ValidationReport {
        total_rows: rows.len(),
        valid_rows: rows.len() - failures.len(),
        invalid_rows: failures.len(),
        ordering: order_error,
        errors: failures
            .iter()
            .map(|f| ValidationErrorDetail {
                index: f.index,
                date: f.date.clone(),
                error: f.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total rows:   {}", report.total_rows);
        println!("Valid rows:   {}", report.valid_rows);
        println!("Invalid rows: {}", report.invalid_rows);
        if let Some(ordering) = &report.ordering {
            println!("Ordering:     {ordering}");
        }

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - {} (index {}): {}", err.date, err.index, err.error);
            }
        }
    }

    if report.invalid_rows > 0 || report.ordering.is_some() {
        Err(InsightCliError::ValidationFailed(report.invalid_rows))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), InsightCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "insight_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Insight version {}", INSIGHT_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}", SCHEMA_VERSION),
    });

    checks.push(DoctorCheck {
        name: "parallel".to_string(),
        status: CheckStatus::Ok,
        message: if cfg!(feature = "parallel") {
            "Per-target fits run in parallel".to_string()
        } else {
            "Per-target fits run sequentially".to_string()
        },
    });

    if let Some(path) = config {
        if path.exists() {
            match InsightConfig::from_path(path) {
                Ok(cfg) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Configuration valid (lags {:?}, windows {:?}, {} levers)",
                        cfg.lags,
                        cfg.windows,
                        cfg.levers.len()
                    ),
                }),
                Err(e) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                }),
            }
        } else {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Configuration file does not exist".to_string(),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass --input <file>)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: INSIGHT_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Insight Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(InsightCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), InsightCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", serde_json::to_string_pretty(&input_json_schema())?);
            } else {
                println!("Input Schema: {}", SCHEMA_VERSION);
                println!();
                println!("One JSON object per calendar day (JSON array or NDJSON):");
                println!();
                println!("  date          YYYY-MM-DD, unique, ascending");
                println!("  metrics       {{ metric_name: number | null }}");
                println!("  subject_id    optional; all rows must agree");
                println!();
                println!("Missing days are allowed and are never interpolated.");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", serde_json::to_string_pretty(&output_json_schema())?);
            } else {
                println!("Output: {{ \"report\": InsightReport, \"plan\": ExperimentPlan }}");
                println!();
                println!("InsightReport");
                println!("  ranked_targets    by adjusted R² desc, AIC asc");
                println!("  predictors        per target, by q asc, |coef| desc; primary lever flagged");
                println!("  network           top positive/negative neighbors per column");
                println!("  omitted_targets   targets skipped, with reason code");
                println!();
                println!("ExperimentPlan");
                println!("  designs           lever, dosage, expected delay, baseline/intervention days,");
                println!("                    tracking cadence, success criterion, confounders");
                println!("  skipped           targets whose lever could not be dosed");
            }
        }
        SchemaType::Config => {
            println!("{}", InsightConfig::default().to_json()?);
        }
    }
    Ok(())
}

fn input_json_schema() -> serde_json::Value {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://synheart.ai/schemas/metrics.daily_row.v1.json",
        "title": "metrics.daily_row.v1",
        "description": "One calendar day of canonical health metrics for one subject",
        "type": "object",
        "required": ["date"],
        "properties": {
            "schema_version": { "type": "string", "const": SCHEMA_VERSION },
            "date": { "type": "string", "format": "date" },
            "subject_id": { "type": "string" },
            "metrics": {
                "type": "object",
                "additionalProperties": { "type": ["number", "null"] }
            }
        }
    })
}

fn output_json_schema() -> serde_json::Value {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://synheart.ai/schemas/insight.analysis.v1.json",
        "title": "insight.analysis.v1",
        "type": "object",
        "required": ["report", "plan"],
        "properties": {
            "report": {
                "type": "object",
                "required": ["report_version", "producer", "ranked_targets", "predictors", "network", "omitted_targets"],
                "properties": {
                    "ranked_targets": { "type": "array" },
                    "predictors": { "type": "array" },
                    "network": { "type": "object" },
                    "omitted_targets": { "type": "array" },
                    "correction_family": { "enum": ["pooled", "per_target"] }
                }
            },
            "plan": {
                "type": "object",
                "required": ["designs"],
                "properties": {
                    "designs": { "type": "array" },
                    "skipped": { "type": "array" }
                }
            }
        }
    })
}

// Error handling

#[derive(Debug)]
enum InsightCliError {
    Io(io::Error),
    Insight(InsightError),
    Json(serde_json::Error),
    NoRows,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for InsightCliError {
    fn from(e: io::Error) -> Self {
        InsightCliError::Io(e)
    }
}

impl From<InsightError> for InsightCliError {
    fn from(e: InsightError) -> Self {
        InsightCliError::Insight(e)
    }
}

impl From<serde_json::Error> for InsightCliError {
    fn from(e: serde_json::Error) -> Self {
        InsightCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<InsightCliError> for CliError {
    fn from(e: InsightCliError) -> Self {
        match e {
            InsightCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            InsightCliError::Insight(e) => {
                let hint = match &e {
                    InsightError::Ordering(_) => "Sort rows by date and remove duplicate days",
                    InsightError::Configuration(_) => "Run 'insight schema config' for valid options",
                    InsightError::ParseError(_) | InsightError::JsonError(_) => {
                        "Ensure input matches metrics.daily_row.v1 schema"
                    }
                    InsightError::InvalidRow(_) => "Run 'insight validate' for details",
                    _ => "Review the input data",
                };
                CliError {
                    code: e.code().to_uppercase(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            InsightCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            InsightCliError::NoRows => CliError {
                code: "NO_ROWS".to_string(),
                message: "No daily rows found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            InsightCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} rows failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            InsightCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_rows: usize,
    valid_rows: usize,
    invalid_rows: usize,
    ordering: Option<String>,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    date: String,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
