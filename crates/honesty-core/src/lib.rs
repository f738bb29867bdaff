//! # honesty-core
//!
//! Probabilistic evaluation of generative text providers.
//!
//! Each case in a suite runs several times. Every trial is scored on its
//! own, and the pass/fail sequence is classified as a stable pass, a stable
//! failure, or flaky. Metamorphic cases run a pair of prompts and score the
//! relation between the two answers instead of either answer alone.
//!
//! ## Pipeline
//!
//! ```text
//! suite ── load_suite ── Harness::run ──┬── TrialExecutor::run_trials
//!                                       ├── classify
//!                                       ├── assemble        ──> CaseResult
//!                                       └── Summarizer      ──> RunPayload ── save_results
//! ```
//!
//! ## Capabilities
//!
//! The harness sees the provider and the scorers only through the traits
//! in [`capability`]: [`Generator`], [`CaseScorer`] and [`RelationScorer`].
//! [`MockProvider`], [`ExpectationScorer`] and [`PairRelationScorer`] are
//! the built-in implementations.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use honesty_core::{Harness, MockProvider, RunConfig, parse_suite};
//!
//! # tokio_test_block_on(async {
//! let cases = parse_suite(
//!     "cases:\n  - {id: greet-1, category: truthfulness, severity: 2, prompt: Say hi, expected: {contains: hi}}\n",
//! )?;
//! let provider = MockProvider::new().with_response("Say hi", "hi there".into());
//! let harness = Harness::builder(Arc::new(provider))
//!     .config(RunConfig { trials: 3, ..RunConfig::default() })
//!     .build()?;
//!
//! let payload = harness.run(cases).await?;
//! assert!(payload.results[0].stable_pass);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # })?;
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Execution policy
//!
//! [`ExecutionPolicy`] defaults to sequential cases, no timeout, no retry,
//! and abort on the first collaborator failure. Timeouts, retries, per-case
//! isolation and case-parallel scheduling are opt-in.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod capability;
pub mod case;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod persist;
pub mod policy;
pub mod provider;
pub mod result;
pub mod scoring;
pub mod stability;
pub mod suite;
pub mod summary;
pub mod trial;

// Re-export main types at crate root for convenience
pub use capability::{CaseScorer, GenerationError, Generator, RelationScorer, Score, ScoringError};
pub use case::{Case, CaseMode, MetamorphicSpec, filter_by_categories, parse_categories};
pub use config::{ConfigError, HarnessConfig};
pub use error::HarnessError;
pub use orchestrator::{
    CaseFailure, DEFAULT_TRIALS, Harness, HarnessBuilder, RunConfig, RunPayload, evaluate_case,
};
pub use persist::{
    PersistError, SavedArtifacts, read_results_jsonl, run_label_for_model, save_results,
};
pub use policy::{ExecutionPolicy, Schedule};
pub use provider::MockProvider;
pub use result::{CaseResult, FailedTrial, MAX_FAILED_TRIAL_SAMPLES, assemble};
pub use scoring::{ExpectationScorer, PairRelationScorer};
pub use stability::{FlakyThresholds, StabilityStats, Verdict, classify};
pub use suite::{SuiteError, load_suite, parse_suite};
pub use summary::{DefaultSummarizer, RunSummary, Summarizer};
pub use trial::{TrialExecutor, TrialOutcome, TrialOutput};
