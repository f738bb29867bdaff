//! Run-time error types for trial execution and orchestration.
//!
//! Load-time failures (malformed suites) live in [`crate::suite::SuiteError`];
//! this module covers everything that can go wrong once trials start.

use thiserror::Error;

use crate::capability::{GenerationError, ScoringError};

/// Errors that abort a case (and, unless isolation is enabled, the run).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HarnessError {
    /// The generation capability failed during a trial.
    #[error("generation failed for case {case_id} (trial {trial}): {source}")]
    Generation {
        /// The case being executed.
        case_id: String,
        /// Zero-based trial index.
        trial: u32,
        /// The underlying provider error.
        #[source]
        source: GenerationError,
    },

    /// A scoring capability failed during a trial.
    #[error("scoring failed for case {case_id} (trial {trial}): {source}")]
    Scoring {
        /// The case being executed.
        case_id: String,
        /// Zero-based trial index.
        trial: u32,
        /// The underlying scorer error.
        #[source]
        source: ScoringError,
    },

    /// A generation call exceeded the policy timeout.
    #[error("generation for case {case_id} (trial {trial}) timed out after {timeout_ms} ms")]
    TrialTimeout {
        /// The case being executed.
        case_id: String,
        /// Zero-based trial index.
        trial: u32,
        /// The configured timeout.
        timeout_ms: u64,
    },

    /// Flaky thresholds violate `0 <= low < high <= 1`.
    #[error("invalid flaky thresholds: low={low}, high={high} (require 0 <= low < high <= 1)")]
    InvalidThresholds {
        /// Lower threshold.
        low: f64,
        /// Upper threshold.
        high: f64,
    },

    /// The execution policy is not usable.
    #[error("invalid execution policy: {0}")]
    InvalidPolicy(String),

    /// A case-parallel task panicked or was cancelled.
    #[error("case task failed: {message}")]
    CaseTask {
        /// Join error description.
        message: String,
    },
}

impl HarnessError {
    /// Returns the error kind as a string identifier.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Generation { .. } => "generation_failure",
            Self::Scoring { .. } => "scoring_failure",
            Self::TrialTimeout { .. } => "trial_timeout",
            Self::InvalidThresholds { .. } => "invalid_thresholds",
            Self::InvalidPolicy(_) => "invalid_policy",
            Self::CaseTask { .. } => "case_task",
        }
    }

    /// Returns `true` if re-running the trial may succeed.
    ///
    /// Scorers are deterministic over a fixed output, so only provider-side
    /// failures are retried.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Generation { .. } | Self::TrialTimeout { .. })
    }

    /// Returns the id of the case that failed, if the error is case-scoped.
    #[must_use]
    pub fn case_id(&self) -> Option<&str> {
        match self {
            Self::Generation { case_id, .. }
            | Self::Scoring { case_id, .. }
            | Self::TrialTimeout { case_id, .. } => Some(case_id),
            _ => None,
        }
    }
}
