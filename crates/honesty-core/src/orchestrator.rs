//! Run orchestrator.
//!
//! Drives a whole run:
//!
//! ```text
//! cases ── filter ──┬── case 0 ── executor ── classify ── assemble ──┐
//!                   ├── case 1 ── ...                                ├── summarize ── RunPayload
//!                   └── case n ── ...                                ┘
//! ```
//!
//! Results always come back in suite order, whichever [`Schedule`] runs
//! the cases. The summarizer is called once, with the full list, after
//! every case has finished.
//!
//! # Failure handling
//!
//! Without isolation, the first collaborator failure aborts the run and no
//! payload is produced. With [`ExecutionPolicy::isolate_case_failures`],
//! the failing case is recorded in [`RunPayload::errors`] and left out of
//! the results and the summary.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::capability::{CaseScorer, Generator, RelationScorer};
use crate::case::{Case, filter_by_categories};
use crate::error::HarnessError;
use crate::policy::{ExecutionPolicy, Schedule};
use crate::result::{CaseResult, assemble};
use crate::scoring::{ExpectationScorer, PairRelationScorer};
use crate::stability::{FlakyThresholds, classify};
use crate::summary::{DefaultSummarizer, Summarizer};
use crate::trial::TrialExecutor;

/// Default number of trials per case.
pub const DEFAULT_TRIALS: u32 = 5;

/// Parameters of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Trials per case.
    pub trials: u32,
    /// Flaky classification thresholds.
    pub thresholds: FlakyThresholds,
    /// Categories to keep. `None` keeps every case.
    pub categories: Option<BTreeSet<String>>,
    /// Timeout, retry, isolation and scheduling.
    pub policy: ExecutionPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            trials: DEFAULT_TRIALS,
            thresholds: FlakyThresholds::default(),
            categories: None,
            policy: ExecutionPolicy::baseline(),
        }
    }
}

/// A case that failed under isolation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseFailure {
    /// Case id.
    pub id: String,
    /// Case category.
    pub category: String,
    /// Error message.
    pub error: String,
}

impl CaseFailure {
    fn new(case: &Case, err: &HarnessError) -> Self {
        Self {
            id: case.id().to_string(),
            category: case.category().to_string(),
            error: err.to_string(),
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPayload {
    /// Opaque summarizer output.
    pub summary: Value,
    /// One result per executed case, in suite order.
    pub results: Vec<CaseResult>,
    /// Cases that failed under isolation. Omitted when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<CaseFailure>,
}

/// The evaluation harness: capabilities plus run configuration.
#[derive(Debug, Clone)]
pub struct Harness {
    executor: TrialExecutor,
    summarizer: Arc<dyn Summarizer>,
    config: RunConfig,
}

/// Builder for [`Harness`].
#[derive(Debug)]
pub struct HarnessBuilder {
    generator: Arc<dyn Generator>,
    scorer: Arc<dyn CaseScorer>,
    relation_scorer: Arc<dyn RelationScorer>,
    summarizer: Arc<dyn Summarizer>,
    config: RunConfig,
}

impl HarnessBuilder {
    /// Replaces the single-prompt scorer.
    #[must_use]
    pub fn scorer(mut self, scorer: Arc<dyn CaseScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Replaces the metamorphic scorer.
    #[must_use]
    pub fn relation_scorer(mut self, scorer: Arc<dyn RelationScorer>) -> Self {
        self.relation_scorer = scorer;
        self
    }

    /// Replaces the summarizer.
    #[must_use]
    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Sets the run configuration.
    #[must_use]
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the harness.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidPolicy`] if the execution policy is
    /// out of bounds.
    pub fn build(self) -> Result<Harness, HarnessError> {
        self.config.policy.validate()?;
        Ok(Harness {
            executor: TrialExecutor::new(
                self.generator,
                self.scorer,
                self.relation_scorer,
                self.config.policy,
            ),
            summarizer: self.summarizer,
            config: self.config,
        })
    }
}

impl Harness {
    /// Starts a builder around `generator`, with the built-in scorers, the
    /// built-in summarizer and the default run configuration.
    #[must_use]
    pub fn builder(generator: Arc<dyn Generator>) -> HarnessBuilder {
        HarnessBuilder {
            generator,
            scorer: Arc::new(ExpectationScorer),
            relation_scorer: Arc::new(PairRelationScorer),
            summarizer: Arc::new(DefaultSummarizer),
            config: RunConfig::default(),
        }
    }

    /// The run configuration.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs `cases` and summarizes the results.
    ///
    /// Cases outside the configured categories are skipped. An empty case
    /// list is not an error.
    ///
    /// # Errors
    ///
    /// Without isolation, returns the first collaborator failure. A
    /// panicked case task is always fatal.
    pub async fn run(&self, cases: Vec<Case>) -> Result<RunPayload, HarnessError> {
        let cases = filter_by_categories(cases, self.config.categories.as_ref());
        info!(
            cases = cases.len(),
            trials = self.config.trials,
            schedule = ?self.config.policy.schedule,
            "starting run"
        );

        let (results, errors) = match self.config.policy.schedule {
            Schedule::Sequential => self.run_sequential(&cases).await?,
            Schedule::CaseParallel { max_concurrency } => {
                self.run_parallel(cases, max_concurrency).await?
            },
        };

        let summary = self.summarizer.summarize(&results);
        info!(
            results = results.len(),
            errors = errors.len(),
            "run complete"
        );
        Ok(RunPayload {
            summary,
            results,
            errors,
        })
    }

    async fn run_sequential(
        &self,
        cases: &[Case],
    ) -> Result<(Vec<CaseResult>, Vec<CaseFailure>), HarnessError> {
        let mut results = Vec::with_capacity(cases.len());
        let mut errors = Vec::new();
        for case in cases {
            match evaluate_case(&self.executor, case, self.config.trials, &self.config.thresholds)
                .await
            {
                Ok(result) => results.push(result),
                Err(err) => errors.push(self.isolate(case, err)?),
            }
        }
        Ok((results, errors))
    }

    async fn run_parallel(
        &self,
        cases: Vec<Case>,
        max_concurrency: usize,
    ) -> Result<(Vec<CaseResult>, Vec<CaseFailure>), HarnessError> {
        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<Result<CaseResult, CaseFailure>>> =
            std::iter::repeat_with(|| None).take(cases.len()).collect();

        for (index, case) in cases.into_iter().enumerate() {
            let executor = self.executor.clone();
            let semaphore = Arc::clone(&semaphore);
            let trials = self.config.trials;
            let thresholds = self.config.thresholds;
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => evaluate_case(&executor, &case, trials, &thresholds).await,
                    Err(_) => Err(HarnessError::CaseTask {
                        message: "case semaphore closed".to_string(),
                    }),
                };
                (index, case, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, case, outcome) = joined.map_err(|e| HarnessError::CaseTask {
                message: e.to_string(),
            })?;
            let slot = match outcome {
                Ok(result) => Ok(result),
                Err(err) => match self.isolate(&case, err) {
                    Ok(failure) => Err(failure),
                    Err(err) => {
                        tasks.abort_all();
                        return Err(err);
                    },
                },
            };
            slots[index] = Some(slot);
        }

        let mut results = Vec::with_capacity(slots.len());
        let mut errors = Vec::new();
        for slot in slots.into_iter().flatten() {
            match slot {
                Ok(result) => results.push(result),
                Err(failure) => errors.push(failure),
            }
        }
        Ok((results, errors))
    }

    /// Converts a case failure into a record when isolation is on, or
    /// hands the error back.
    fn isolate(&self, case: &Case, err: HarnessError) -> Result<CaseFailure, HarnessError> {
        if !self.config.policy.isolate_case_failures {
            return Err(err);
        }
        warn!(
            case_id = case.id(),
            kind = err.kind(),
            error = %err,
            "case failed, continuing"
        );
        Ok(CaseFailure::new(case, &err))
    }
}

/// Runs one case end to end: trials, classification, assembly.
///
/// # Errors
///
/// Returns the first trial failure that survives the executor's policy.
#[instrument(skip_all, fields(case_id = %case.id(), category = %case.category(), trials = trials))]
pub async fn evaluate_case(
    executor: &TrialExecutor,
    case: &Case,
    trials: u32,
    thresholds: &FlakyThresholds,
) -> Result<CaseResult, HarnessError> {
    let outcomes = executor.run_trials(case, trials).await?;
    let passes: Vec<bool> = outcomes.iter().map(|o| o.passed).collect();
    let stats = classify(&passes, thresholds);
    let result = assemble(case, outcomes, &stats);
    info!(
        verdict = stats.verdict().as_str(),
        pass_count = result.pass_count,
        pass_rate = result.pass_rate,
        "case complete"
    );
    Ok(result)
}
