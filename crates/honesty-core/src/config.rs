//! Harness configuration.
//!
//! An optional TOML file supplies run defaults. Every field is optional so
//! that the command line can layer its own values on top before the file
//! is turned into a [`RunConfig`].
//!
//! ```toml
//! [run]
//! suite = "testsuites/mini_suite.yaml"
//! model = "provider://default"
//! trials = 5
//! flaky_low = 0.2
//! flaky_high = 0.8
//! categories = ["truthfulness", "consistency"]
//!
//! [policy]
//! trial_timeout_ms = 30000
//! max_retries = 1
//! isolate_case_failures = true
//! schedule = "case_parallel"
//! max_concurrency = 4
//!
//! [output]
//! out_dir = "results"
//!
//! [mock.responses]
//! "Say hi" = ["hi there", "hello"]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::orchestrator::{DEFAULT_TRIALS, RunConfig};
use crate::policy::{ExecutionPolicy, Schedule};
use crate::provider::MockProvider;
use crate::stability::{DEFAULT_FLAKY_HIGH, DEFAULT_FLAKY_LOW, FlakyThresholds};

/// Default suite path.
pub const DEFAULT_SUITE: &str = "testsuites/mini_suite.yaml";

/// Default output directory.
pub const DEFAULT_OUT_DIR: &str = "results";

/// Default model label.
pub const DEFAULT_MODEL: &str = "provider://default";

/// Default worker count when case-parallel scheduling is selected without
/// an explicit bound.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    /// Run parameters.
    #[serde(default)]
    pub run: RunSection,

    /// Execution policy.
    #[serde(default)]
    pub policy: PolicySection,

    /// Artifact output.
    #[serde(default)]
    pub output: OutputSection,

    /// Mock provider responses.
    #[serde(default)]
    pub mock: MockSection,
}

/// `[run]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    /// Suite file.
    pub suite: Option<PathBuf>,
    /// Model label used in artifact names.
    pub model: Option<String>,
    /// Trials per case.
    pub trials: Option<u32>,
    /// Lower flaky threshold.
    pub flaky_low: Option<f64>,
    /// Upper flaky threshold.
    pub flaky_high: Option<f64>,
    /// Categories to keep. Empty keeps everything.
    pub categories: Option<Vec<String>>,
}

/// How cases are scheduled, as written in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// One case at a time.
    Sequential,
    /// Bounded parallelism across cases.
    CaseParallel,
}

/// `[policy]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    /// Per-generation timeout in milliseconds.
    pub trial_timeout_ms: Option<u64>,
    /// Retries after a generation failure or timeout.
    pub max_retries: Option<u32>,
    /// Keep going when a case fails.
    pub isolate_case_failures: Option<bool>,
    /// Scheduling strategy.
    pub schedule: Option<ScheduleKind>,
    /// Worker bound for case-parallel scheduling.
    pub max_concurrency: Option<usize>,
}

/// `[output]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    /// Artifact directory.
    pub out_dir: Option<PathBuf>,
}

/// `[mock]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockSection {
    /// Canned responses per prompt, served in turn.
    #[serde(default)]
    pub responses: BTreeMap<String, Vec<String>>,
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or contains unknown keys.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Suite path, falling back to [`DEFAULT_SUITE`].
    #[must_use]
    pub fn suite(&self) -> PathBuf {
        self.run
            .suite
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SUITE))
    }

    /// Model label, falling back to [`DEFAULT_MODEL`].
    #[must_use]
    pub fn model(&self) -> &str {
        self.run.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Output directory, falling back to [`DEFAULT_OUT_DIR`].
    #[must_use]
    pub fn out_dir(&self) -> PathBuf {
        self.output
            .out_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR))
    }

    /// Builds the mock provider described by `[mock]`.
    #[must_use]
    pub fn mock_provider(&self) -> MockProvider {
        self.mock
            .responses
            .iter()
            .fold(MockProvider::new(), |provider, (prompt, responses)| {
                provider.with_responses(
                    prompt.clone(),
                    responses.iter().cloned().map(Value::String).collect(),
                )
            })
    }

    /// Resolves defaults and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the thresholds or the policy
    /// are out of bounds.
    pub fn to_run_config(&self) -> Result<RunConfig, ConfigError> {
        let thresholds = FlakyThresholds::new(
            self.run.flaky_low.unwrap_or(DEFAULT_FLAKY_LOW),
            self.run.flaky_high.unwrap_or(DEFAULT_FLAKY_HIGH),
        )
        .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let categories: Option<BTreeSet<String>> = self
            .run
            .categories
            .as_ref()
            .map(|list| {
                list.iter()
                    .map(|c| c.trim())
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect::<BTreeSet<String>>()
            })
            .filter(|set| !set.is_empty());

        let schedule = match self.policy.schedule {
            None | Some(ScheduleKind::Sequential) => Schedule::Sequential,
            Some(ScheduleKind::CaseParallel) => Schedule::CaseParallel {
                max_concurrency: self
                    .policy
                    .max_concurrency
                    .unwrap_or(DEFAULT_MAX_CONCURRENCY),
            },
        };

        let mut policy = ExecutionPolicy::baseline()
            .with_max_retries(self.policy.max_retries.unwrap_or(0))
            .with_isolation(self.policy.isolate_case_failures.unwrap_or(false))
            .with_schedule(schedule);
        if let Some(ms) = self.policy.trial_timeout_ms {
            policy = policy.with_trial_timeout(Duration::from_millis(ms));
        }
        policy
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(RunConfig {
            trials: self.run.trials.unwrap_or(DEFAULT_TRIALS),
            thresholds,
            categories,
            policy,
        })
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
