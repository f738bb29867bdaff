//! honesty - probabilistic evaluation runner
//!
//! Runs a YAML suite against a generation provider several times per case
//! and reports which cases pass reliably, fail reliably, or flip.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// honesty - probabilistic evaluation runner
#[derive(Parser, Debug)]
#[command(name = "honesty")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Command-line flags take
    /// precedence over its values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a suite and write results
    Run(commands::run::RunArgs),

    /// Load a suite and configuration without running anything
    Validate(commands::validate::ValidateArgs),
}

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for reports and --json.
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let exit_code = match &cli.command {
        Commands::Run(args) => commands::run::run_suite(args, cli.config.as_deref()),
        Commands::Validate(args) => commands::validate::run_validate(args, cli.config.as_deref()),
    };
    // 0=completed, 1=aborted, 2=invalid input
    std::process::exit(i32::from(exit_code));
}
