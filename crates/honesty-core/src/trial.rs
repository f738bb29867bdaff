//! Trial executor.
//!
//! Runs one case for `T` trials, strictly in order: trial `i` finishes,
//! scoring included, before trial `i + 1` starts. Timing and the order of
//! failure samples both depend on that.
//!
//! ```text
//! single:       start ── generate(prompt) ── score(out, expected) ── stop
//! metamorphic:  start ── generate(a) ── generate(b) ── score_pair ── stop
//! ```
//!
//! Collaborator failures propagate. Under the baseline policy there is no
//! timeout and no retry, so the first failure aborts the case.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::capability::{CaseScorer, Generator, RelationScorer, Score, ScoringError};
use crate::case::{Case, CaseMode};
use crate::error::HarnessError;
use crate::policy::ExecutionPolicy;
use crate::stability::round_to;

/// Decimal places kept for per-trial elapsed seconds.
pub const ELAPSED_DECIMALS: i32 = 4;

/// Upper bound on outcome slots reserved before the first trial runs.
const MAX_PREALLOCATED_OUTCOMES: usize = 1024;

/// What a trial produced.
///
/// Serializes as the raw value for single-prompt trials and as `{"a", "b"}`
/// for metamorphic trials. There is no inverse: a single output may itself be
/// an `{"a", "b"}` object, so persisted outputs are read back as plain values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TrialOutput {
    /// Both outputs of a metamorphic trial.
    Pair {
        /// Output for the `a` prompt.
        a: Value,
        /// Output for the `b` prompt.
        b: Value,
    },
    /// Output of a single-prompt trial.
    Single(Value),
}

impl TrialOutput {
    /// The persisted JSON form.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Pair { a, b } => {
                let mut pair = Map::new();
                pair.insert("a".to_string(), a);
                pair.insert("b".to_string(), b);
                Value::Object(pair)
            },
            Self::Single(value) => value,
        }
    }
}

/// The result of one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    /// Zero-based trial index.
    pub index: u32,
    /// Generation output(s).
    pub output: TrialOutput,
    /// Scoring decision.
    pub passed: bool,
    /// Scoring reasons, in order.
    pub reasons: Vec<String>,
    /// Wall-clock seconds, rounded to [`ELAPSED_DECIMALS`] places.
    pub elapsed_seconds: f64,
}

/// Runs trials against the generation and scoring capabilities.
///
/// Cheap to clone; the capabilities are shared.
#[derive(Debug, Clone)]
pub struct TrialExecutor {
    generator: Arc<dyn Generator>,
    scorer: Arc<dyn CaseScorer>,
    relation_scorer: Arc<dyn RelationScorer>,
    policy: ExecutionPolicy,
}

impl TrialExecutor {
    /// Creates an executor with the given capabilities and policy.
    #[must_use]
    pub fn new(
        generator: Arc<dyn Generator>,
        scorer: Arc<dyn CaseScorer>,
        relation_scorer: Arc<dyn RelationScorer>,
        policy: ExecutionPolicy,
    ) -> Self {
        Self {
            generator,
            scorer,
            relation_scorer,
            policy,
        }
    }

    /// The policy this executor applies.
    #[must_use]
    pub const fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Runs `trials` trials of `case` in order.
    ///
    /// Zero trials yields an empty vector.
    ///
    /// # Errors
    ///
    /// Returns the first generation, scoring or timeout failure that survives
    /// the retry policy. Outcomes of earlier trials are discarded.
    pub async fn run_trials(
        &self,
        case: &Case,
        trials: u32,
    ) -> Result<Vec<TrialOutcome>, HarnessError> {
        let reserve = usize::try_from(trials).map_or(MAX_PREALLOCATED_OUTCOMES, |n| {
            n.min(MAX_PREALLOCATED_OUTCOMES)
        });
        let mut outcomes = Vec::with_capacity(reserve);
        for index in 0..trials {
            let outcome = self.run_trial_with_retries(case, index).await?;
            debug!(
                case_id = case.id(),
                trial = index,
                passed = outcome.passed,
                elapsed_s = outcome.elapsed_seconds,
                "trial complete"
            );
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn run_trial_with_retries(
        &self,
        case: &Case,
        index: u32,
    ) -> Result<TrialOutcome, HarnessError> {
        let mut attempt: u32 = 0;
        loop {
            match self.run_trial(case, index).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retriable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    warn!(
                        case_id = case.id(),
                        trial = index,
                        attempt,
                        max_retries = self.policy.max_retries,
                        error = %err,
                        "retrying trial"
                    );
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// One attempt at one trial. Elapsed time covers the final attempt only.
    async fn run_trial(&self, case: &Case, index: u32) -> Result<TrialOutcome, HarnessError> {
        let empty = Value::Object(Map::new());
        let start = Instant::now();

        let (output, score) = match case.mode() {
            CaseMode::Single { prompt, expected } => {
                let out = self.generate(case, index, prompt).await?;
                let score = self
                    .scorer
                    .score(&out, expected.unwrap_or(&empty))
                    .map_err(|source| scoring_error(case, index, source))?;
                (TrialOutput::Single(out), score)
            },
            CaseMode::Metamorphic(pair) => {
                let out_a = self.generate(case, index, &pair.a_prompt).await?;
                let out_b = self.generate(case, index, &pair.b_prompt).await?;
                let score = self
                    .relation_scorer
                    .score_pair(&out_a, &out_b, pair.expectation.as_ref().unwrap_or(&empty))
                    .map_err(|source| scoring_error(case, index, source))?;
                (TrialOutput::Pair { a: out_a, b: out_b }, score)
            },
        };

        let elapsed = start.elapsed();
        let Score { passed, reasons } = score;
        Ok(TrialOutcome {
            index,
            output,
            passed,
            reasons,
            elapsed_seconds: round_to(elapsed.as_secs_f64(), ELAPSED_DECIMALS),
        })
    }

    async fn generate(&self, case: &Case, index: u32, prompt: &str) -> Result<Value, HarnessError> {
        let call = self.generator.generate(prompt);
        let result = match self.policy.trial_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| HarnessError::TrialTimeout {
                    case_id: case.id().to_string(),
                    trial: index,
                    timeout_ms: duration_ms(limit),
                })?,
            None => call.await,
        };
        result.map_err(|source| HarnessError::Generation {
            case_id: case.id().to_string(),
            trial: index,
            source,
        })
    }
}

fn scoring_error(case: &Case, index: u32, source: ScoringError) -> HarnessError {
    HarnessError::Scoring {
        case_id: case.id().to_string(),
        trial: index,
        source,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::capability::GenerationError;
    use crate::case::MetamorphicSpec;

    #[derive(Debug, Default)]
    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
        fail_first: AtomicU32,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn generate(&self, prompt: &str) -> Result<Value, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let remaining = self.fail_first.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_first.store(remaining - 1, Ordering::SeqCst);
                return Err(GenerationError::request("transient"));
            }
            Ok(json!(format!("answer to {prompt}")))
        }
    }

    #[derive(Debug)]
    struct SlowGenerator;

    #[async_trait]
    impl Generator for SlowGenerator {
        async fn generate(&self, _prompt: &str) -> Result<Value, GenerationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
    }

    /// Passes odd-numbered calls, fails even-numbered ones, starting with a pass.
    #[derive(Debug, Default)]
    struct AlternatingScorer {
        calls: AtomicU32,
        expectations: Mutex<Vec<Value>>,
    }

    impl CaseScorer for AlternatingScorer {
        fn score(&self, _output: &Value, expectation: &Value) -> Result<Score, ScoringError> {
            self.expectations.lock().unwrap().push(expectation.clone());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Ok(Score::pass(vec!["ok".to_string()]))
            } else {
                Ok(Score::fail(vec![format!("call {n} failed")]))
            }
        }
    }

    #[derive(Debug)]
    struct EqualPairScorer;

    impl RelationScorer for EqualPairScorer {
        fn score_pair(&self, a: &Value, b: &Value, _expectation: &Value) -> Result<Score, ScoringError> {
            Ok(Score {
                passed: a == b,
                reasons: vec!["compared".to_string()],
            })
        }
    }

    #[derive(Debug)]
    struct BrokenScorer;

    impl CaseScorer for BrokenScorer {
        fn score(&self, _output: &Value, _expectation: &Value) -> Result<Score, ScoringError> {
            Err(ScoringError::invalid_expectation("unparseable"))
        }
    }

    fn executor_with(
        generator: Arc<dyn Generator>,
        scorer: Arc<dyn CaseScorer>,
        policy: ExecutionPolicy,
    ) -> TrialExecutor {
        TrialExecutor::new(generator, scorer, Arc::new(EqualPairScorer), policy)
    }

    #[tokio::test]
    async fn test_single_prompt_trials_run_in_order() {
        let generator = Arc::new(RecordingGenerator::default());
        let scorer = Arc::new(AlternatingScorer::default());
        let executor = executor_with(generator.clone(), scorer.clone(), ExecutionPolicy::default());
        let case = Case::single("greet-1", "truthfulness", 2, "Say hi", json!({"contains": "hi"}));

        let outcomes = executor.run_trials(&case, 5).await.unwrap();

        assert_eq!(outcomes.len(), 5);
        let indices: Vec<u32> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indices, [0, 1, 2, 3, 4]);
        let passes: Vec<bool> = outcomes.iter().map(|o| o.passed).collect();
        assert_eq!(passes, [true, false, true, false, true]);
        assert_eq!(outcomes[0].output, TrialOutput::Single(json!("answer to Say hi")));
        assert_eq!(generator.prompts.lock().unwrap().len(), 5);
        assert!(
            scorer
                .expectations
                .lock()
                .unwrap()
                .iter()
                .all(|e| e == &json!({"contains": "hi"}))
        );
        assert!(outcomes.iter().all(|o| o.elapsed_seconds >= 0.0));
    }

    #[tokio::test]
    async fn test_zero_trials_is_empty() {
        let executor = executor_with(
            Arc::new(RecordingGenerator::default()),
            Arc::new(AlternatingScorer::default()),
            ExecutionPolicy::default(),
        );
        let case = Case::single("c", "x", 1, "p", json!({}));

        assert!(executor.run_trials(&case, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_prompt_and_expectation_use_empty_defaults() {
        let generator = Arc::new(RecordingGenerator::default());
        let scorer = Arc::new(AlternatingScorer::default());
        let executor = executor_with(generator.clone(), scorer.clone(), ExecutionPolicy::default());
        let case =
            Case::from_descriptor(0, &json!({"id": "bare", "category": "x", "severity": 1})).unwrap();

        executor.run_trials(&case, 1).await.unwrap();

        assert_eq!(generator.prompts.lock().unwrap().as_slice(), [String::new()]);
        assert_eq!(scorer.expectations.lock().unwrap().as_slice(), [json!({})]);
    }

    #[tokio::test]
    async fn test_metamorphic_generates_a_then_b() {
        let generator = Arc::new(RecordingGenerator::default());
        let executor = executor_with(
            generator.clone(),
            Arc::new(AlternatingScorer::default()),
            ExecutionPolicy::default(),
        );
        let case = Case::metamorphic(
            "pair",
            "consistency",
            1,
            MetamorphicSpec {
                a_prompt: "first".to_string(),
                b_prompt: "second".to_string(),
                expectation: None,
            },
        );

        let outcomes = executor.run_trials(&case, 2).await.unwrap();

        assert_eq!(
            generator.prompts.lock().unwrap().as_slice(),
            ["first", "second", "first", "second"]
        );
        let serialized = serde_json::to_value(&outcomes[0].output).unwrap();
        let keys: Vec<&String> = serialized.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["a", "b"]);
        assert!(!outcomes[0].passed, "different answers must not compare equal");
    }

    #[tokio::test]
    async fn test_generation_failure_propagates_without_retry() {
        let generator = Arc::new(RecordingGenerator {
            fail_first: AtomicU32::new(1),
            ..RecordingGenerator::default()
        });
        let executor = executor_with(
            generator.clone(),
            Arc::new(AlternatingScorer::default()),
            ExecutionPolicy::default(),
        );
        let case = Case::single("c", "x", 1, "p", json!({}));

        let err = executor.run_trials(&case, 3).await.unwrap_err();

        assert!(matches!(err, HarnessError::Generation { trial: 0, .. }), "{err:?}");
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_huge_trial_count_does_not_reserve_up_front() {
        let generator = Arc::new(RecordingGenerator {
            fail_first: AtomicU32::new(1),
            ..RecordingGenerator::default()
        });
        let executor = executor_with(
            generator.clone(),
            Arc::new(AlternatingScorer::default()),
            ExecutionPolicy::default(),
        );
        let case = Case::single("c", "x", 1, "p", json!({}));

        let err = executor.run_trials(&case, u32::MAX).await.unwrap_err();

        assert!(matches!(err, HarnessError::Generation { trial: 0, .. }), "{err:?}");
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_output_into_value() {
        let pair = TrialOutput::Pair {
            a: json!("4"),
            b: json!({"n": 5}),
        };
        assert_eq!(pair.into_value(), json!({"a": "4", "b": {"n": 5}}));
        let single = TrialOutput::Single(json!({"a": 1, "b": 2, "c": 3}));
        assert_eq!(single.into_value(), json!({"a": 1, "b": 2, "c": 3}));
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_generation_failure() {
        let generator = Arc::new(RecordingGenerator {
            fail_first: AtomicU32::new(2),
            ..RecordingGenerator::default()
        });
        let executor = executor_with(
            generator.clone(),
            Arc::new(AlternatingScorer::default()),
            ExecutionPolicy::baseline().with_max_retries(2),
        );
        let case = Case::single("c", "x", 1, "p", json!({}));

        let outcomes = executor.run_trials(&case, 1).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(generator.prompts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_scoring_failure_is_not_retried() {
        let generator = Arc::new(RecordingGenerator::default());
        let executor = executor_with(
            generator.clone(),
            Arc::new(BrokenScorer),
            ExecutionPolicy::baseline().with_max_retries(3),
        );
        let case = Case::single("c", "x", 1, "p", json!({}));

        let err = executor.run_trials(&case, 2).await.unwrap_err();

        assert!(matches!(err, HarnessError::Scoring { trial: 0, .. }), "{err:?}");
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_generation() {
        let executor = executor_with(
            Arc::new(SlowGenerator),
            Arc::new(AlternatingScorer::default()),
            ExecutionPolicy::baseline().with_trial_timeout(Duration::from_millis(250)),
        );
        let case = Case::single("slow", "x", 1, "p", json!({}));

        let err = executor.run_trials(&case, 1).await.unwrap_err();

        assert!(
            matches!(err, HarnessError::TrialTimeout { timeout_ms: 250, .. }),
            "{err:?}"
        );
    }
}
