//! `honesty validate`: check a suite and configuration without running.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use honesty_core::{filter_by_categories, load_suite};
use serde_json::json;

use super::{exit_codes, load_config};

/// Arguments for `honesty validate`.
#[derive(Debug, Args, Default)]
pub struct ValidateArgs {
    /// Suite file, YAML or JSON [default: from config, else
    /// testsuites/mini_suite.yaml]
    #[arg(long)]
    pub suite: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Counts from a validated suite.
#[derive(Debug, PartialEq, Eq)]
struct SuiteOverview {
    suite: PathBuf,
    total: usize,
    selected: usize,
    metamorphic: usize,
    by_category: BTreeMap<String, usize>,
}

/// Runs the `validate` command, returning an appropriate exit code as u8.
///
/// # Exit Codes
///
/// - 0: Suite and configuration are valid
/// - 2: Invalid configuration or suite
pub fn run_validate(args: &ValidateArgs, config_path: Option<&Path>) -> u8 {
    match validate_inner(args, config_path) {
        Ok(overview) => {
            output_overview(&overview, args.json);
            exit_codes::SUCCESS
        },
        Err(e) => {
            eprintln!("Error: Invalid input - {e:#}");
            exit_codes::INVALID_INPUT
        },
    }
}

fn validate_inner(args: &ValidateArgs, config_path: Option<&Path>) -> Result<SuiteOverview> {
    let mut config = load_config(config_path)?;
    if let Some(suite) = &args.suite {
        config.run.suite = Some(suite.clone());
    }
    let run_config = config.to_run_config().context("invalid run settings")?;

    let suite = config.suite();
    let cases = load_suite(&suite)?;
    let total = cases.len();
    let selected = filter_by_categories(cases, run_config.categories.as_ref());

    let mut by_category = BTreeMap::new();
    for case in &selected {
        *by_category.entry(case.category().to_string()).or_insert(0) += 1;
    }

    Ok(SuiteOverview {
        suite,
        total,
        selected: selected.len(),
        metamorphic: selected.iter().filter(|c| c.is_metamorphic()).count(),
        by_category,
    })
}

fn output_overview(overview: &SuiteOverview, json_output: bool) {
    if json_output {
        let value = json!({
            "suite": overview.suite.display().to_string(),
            "total_cases": overview.total,
            "selected_cases": overview.selected,
            "metamorphic_cases": overview.metamorphic,
            "by_category": overview.by_category,
        });
        let output = serde_json::to_string_pretty(&value)
            .unwrap_or_else(|e| format!("{{\"error\": \"overview serialization failed: {e}\"}}"));
        println!("{output}");
    } else {
        println!("Suite: {}", overview.suite.display());
        println!(
            "Cases: {} selected of {} ({} metamorphic)",
            overview.selected, overview.total, overview.metamorphic
        );
        for (category, count) in &overview.by_category {
            println!("  {category:<18} {count}");
        }
    }
}
