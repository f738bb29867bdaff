//! Capability traits consumed by the trial executor.
//!
//! The harness never looks inside a provider or a scorer. It sees three
//! seams:
//!
//! ```text
//! Generator       prompt            -> output value
//! CaseScorer      (output, expect)  -> Score
//! RelationScorer  (a, b, expect)    -> Score
//! ```
//!
//! Output values and expectations are opaque [`serde_json::Value`]s.
//!
//! # Thread Safety
//!
//! All capabilities are `Send + Sync`. Case-parallel scheduling invokes them
//! concurrently, so implementations must tolerate overlapping calls.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure reported by a generation capability.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GenerationError {
    /// The request could not be completed.
    #[error("provider request failed: {message}")]
    Request {
        /// Provider-supplied description.
        message: String,
    },

    /// The provider answered with something that is not a usable output.
    #[error("provider returned an invalid response: {message}")]
    InvalidResponse {
        /// Provider-supplied description.
        message: String,
    },
}

impl GenerationError {
    /// Shorthand for [`GenerationError::Request`].
    #[must_use]
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Shorthand for [`GenerationError::InvalidResponse`].
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

/// Failure reported by a scoring capability.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScoringError {
    /// The expectation could not be interpreted.
    #[error("invalid expectation: {message}")]
    InvalidExpectation {
        /// What was wrong with it.
        message: String,
    },

    /// A metamorphic expectation named a relation the scorer does not know.
    #[error("unknown metamorphic relation: {relation}")]
    UnknownRelation {
        /// The relation name as written in the suite.
        relation: String,
    },
}

impl ScoringError {
    /// Shorthand for [`ScoringError::InvalidExpectation`].
    #[must_use]
    pub fn invalid_expectation(message: impl Into<String>) -> Self {
        Self::InvalidExpectation {
            message: message.into(),
        }
    }
}

/// A scoring decision: pass/fail plus human-readable reasons, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    /// Whether the trial passed.
    pub passed: bool,
    /// Why, in the order the checks ran.
    pub reasons: Vec<String>,
}

impl Score {
    /// A passing score.
    #[must_use]
    pub fn pass(reasons: Vec<String>) -> Self {
        Self {
            passed: true,
            reasons,
        }
    }

    /// A failing score.
    #[must_use]
    pub fn fail(reasons: Vec<String>) -> Self {
        Self {
            passed: false,
            reasons,
        }
    }
}

/// Text generation capability.
///
/// Must be safe to call repeatedly; metamorphic trials call it exactly twice
/// (first with the `a` prompt, then with the `b` prompt).
#[async_trait]
pub trait Generator: Send + Sync + fmt::Debug {
    /// Short name used in log fields.
    fn name(&self) -> &str {
        "generator"
    }

    /// Produces an output for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<Value, GenerationError>;
}

/// Scores one output against a single-prompt expectation.
pub trait CaseScorer: Send + Sync + fmt::Debug {
    /// Decides whether `output` satisfies `expectation`.
    fn score(&self, output: &Value, expectation: &Value) -> Result<Score, ScoringError>;
}

/// Scores a pair of outputs against a metamorphic expectation.
pub trait RelationScorer: Send + Sync + fmt::Debug {
    /// Decides whether outputs `a` and `b` satisfy the relation in
    /// `expectation`.
    fn score_pair(&self, a: &Value, b: &Value, expectation: &Value)
    -> Result<Score, ScoringError>;
}
