//! `honesty run`: execute a suite and write its artifacts.
//!
//! Settings resolve in order: command-line flag, configuration file,
//! built-in default. The mock provider is the only generation backend; the
//! `--model` value is a reporting label that also names the artifacts.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use honesty_core::config::ScheduleKind;
use honesty_core::{
    HarnessConfig, Harness, RunConfig, RunPayload, SavedArtifacts, load_suite, run_label_for_model,
    save_results,
};
use tracing::info;

use super::{exit_codes, load_config};

/// Arguments for `honesty run`.
#[derive(Debug, Args, Default)]
pub struct RunArgs {
    /// Suite file, YAML or JSON [default: testsuites/mini_suite.yaml]
    #[arg(long)]
    pub suite: Option<PathBuf>,

    /// Trials per case [default: 5]
    #[arg(long)]
    pub trials: Option<u32>,

    /// Output directory for results [default: results]
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Model label for reporting, e.g. gpt-4o or provider://default
    /// [default: provider://default]
    #[arg(long)]
    pub model: Option<String>,

    /// Comma-separated categories to run. Empty runs every case.
    ///
    /// Example: `--categories truthfulness,calibration`
    #[arg(long, value_delimiter = ',')]
    pub categories: Option<Vec<String>>,

    /// Lower flaky threshold [default: 0.2]
    #[arg(long)]
    pub flaky_low: Option<f64>,

    /// Upper flaky threshold [default: 0.8]
    #[arg(long)]
    pub flaky_high: Option<f64>,

    /// Timeout for each generation call, in milliseconds
    #[arg(long)]
    pub trial_timeout_ms: Option<u64>,

    /// Retries after a generation failure or timeout
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Record failing cases and keep going instead of aborting the run
    #[arg(long)]
    pub isolate_failures: bool,

    /// Run up to N cases at once
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,

    /// Print the full payload as JSON instead of the console report
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    /// Layers the flags that were given over `config`.
    pub fn apply_to(&self, config: &mut HarnessConfig) {
        if let Some(suite) = &self.suite {
            config.run.suite = Some(suite.clone());
        }
        if let Some(trials) = self.trials {
            config.run.trials = Some(trials);
        }
        if let Some(out_dir) = &self.out_dir {
            config.output.out_dir = Some(out_dir.clone());
        }
        if let Some(model) = &self.model {
            config.run.model = Some(model.clone());
        }
        if let Some(categories) = &self.categories {
            config.run.categories = Some(categories.clone());
        }
        if let Some(low) = self.flaky_low {
            config.run.flaky_low = Some(low);
        }
        if let Some(high) = self.flaky_high {
            config.run.flaky_high = Some(high);
        }
        if let Some(ms) = self.trial_timeout_ms {
            config.policy.trial_timeout_ms = Some(ms);
        }
        if let Some(retries) = self.max_retries {
            config.policy.max_retries = Some(retries);
        }
        if self.isolate_failures {
            config.policy.isolate_case_failures = Some(true);
        }
        if let Some(workers) = self.parallel {
            config.policy.schedule = Some(ScheduleKind::CaseParallel);
            config.policy.max_concurrency = Some(workers);
        }
    }
}

/// Internal error type for CLI error handling.
#[derive(Debug)]
enum RunCliError {
    /// Arguments, configuration or suite were invalid.
    InvalidInput(String),
    /// The run started but could not finish.
    Aborted(String),
}

/// What a completed run leaves behind.
#[derive(Debug)]
struct RunReport {
    suite: PathBuf,
    model: String,
    run_config: RunConfig,
    payload: RunPayload,
    saved: SavedArtifacts,
}

/// Runs the `run` command, returning an appropriate exit code as u8.
///
/// # Exit Codes
///
/// - 0: Run completed and artifacts were written
/// - 1: A collaborator failure aborted the run, or artifacts could not be
///   written
/// - 2: Invalid arguments, configuration or suite
pub fn run_suite(args: &RunArgs, config_path: Option<&Path>) -> u8 {
    match run_suite_inner(args, config_path) {
        Ok(report) => {
            output_report(&report, args.json);
            exit_codes::SUCCESS
        },
        Err(RunCliError::InvalidInput(msg)) => {
            eprintln!("Error: Invalid input - {msg}");
            exit_codes::INVALID_INPUT
        },
        Err(RunCliError::Aborted(msg)) => {
            eprintln!("Error: Run aborted - {msg}");
            exit_codes::ABORTED
        },
    }
}

fn run_suite_inner(args: &RunArgs, config_path: Option<&Path>) -> Result<RunReport, RunCliError> {
    let (config, run_config) =
        resolve(args, config_path).map_err(|e| RunCliError::InvalidInput(format!("{e:#}")))?;

    let suite = config.suite();
    let cases = load_suite(&suite).map_err(|e| RunCliError::InvalidInput(e.to_string()))?;
    let model = config.model().to_string();

    let harness = Harness::builder(Arc::new(config.mock_provider()))
        .config(run_config.clone())
        .build()
        .map_err(|e| RunCliError::InvalidInput(e.to_string()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
        .map_err(|e| RunCliError::Aborted(format!("{e:#}")))?;

    info!(suite = %suite.display(), model = %model, cases = cases.len(), "running suite");
    let payload = runtime
        .block_on(harness.run(cases))
        .map_err(|e| RunCliError::Aborted(e.to_string()))?;

    let saved = save_results(&payload, &config.out_dir(), &run_label_for_model(&model))
        .map_err(|e| RunCliError::Aborted(e.to_string()))?;

    Ok(RunReport {
        suite,
        model,
        run_config,
        payload,
        saved,
    })
}

/// Merges file and flags, then validates the result.
fn resolve(args: &RunArgs, config_path: Option<&Path>) -> Result<(HarnessConfig, RunConfig)> {
    let mut config = load_config(config_path)?;
    args.apply_to(&mut config);
    let run_config = config
        .to_run_config()
        .context("invalid run settings")?;
    Ok((config, run_config))
}

/// Outputs a report to stdout.
fn output_report(report: &RunReport, json_output: bool) {
    if json_output {
        let output = serde_json::to_string_pretty(&report.payload)
            .unwrap_or_else(|e| format!("{{\"error\": \"payload serialization failed: {e}\"}}"));
        println!("{output}");
    } else {
        print!("{}", render_report(report));
    }
}

fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Suite: {}", report.suite.display());
    let _ = writeln!(out, "Model: {}", report.model);
    if let Some(categories) = &report.run_config.categories {
        let names: Vec<&str> = categories.iter().map(String::as_str).collect();
        let _ = writeln!(out, "Categories: {}", names.join(", "));
    }
    out.push('\n');

    for result in &report.payload.results {
        let _ = writeln!(
            out,
            "{:5} {:7} {:<18} (severity {})  pass_rate={:?}",
            result.verdict().label(),
            result.id,
            result.category,
            result.severity,
            result.pass_rate
        );
    }
    for failure in &report.payload.errors {
        let _ = writeln!(
            out,
            "{:5} {:7} {:<18} {}",
            "ERROR", failure.id, failure.category, failure.error
        );
    }

    out.push('\n');
    let _ = writeln!(out, "Saved: {}", report.saved.jsonl_path.display());
    let summary = serde_json::to_string_pretty(&report.payload.summary)
        .unwrap_or_else(|e| format!("{{\"error\": \"summary serialization failed: {e}\"}}"));
    let _ = writeln!(out, "{summary}");
    out
}
