//! Subcommand implementations.

use std::path::Path;

use anyhow::{Context, Result};
use honesty_core::HarnessConfig;

pub mod run;
pub mod validate;

/// Exit codes shared by every subcommand.
pub mod exit_codes {
    /// The command completed.
    pub const SUCCESS: u8 = 0;
    /// A collaborator failed and the run was aborted.
    pub const ABORTED: u8 = 1;
    /// Arguments, configuration or suite were invalid.
    pub const INVALID_INPUT: u8 = 2;
}

/// Loads the configuration file, or the all-defaults configuration when no
/// path was given.
pub fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("failed to load config '{}'", path.display())),
        None => Ok(HarnessConfig::default()),
    }
}
