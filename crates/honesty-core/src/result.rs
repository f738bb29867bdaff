//! Case result assembly.
//!
//! A [`CaseResult`] is the unit of persistence: one JSON line per case. It is
//! bounded in size regardless of the trial count because only the first
//! [`MAX_FAILED_TRIAL_SAMPLES`] failing trials are kept.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::case::Case;
use crate::stability::{StabilityStats, Verdict, round_to};
use crate::trial::TrialOutcome;

/// Failing trials retained per case.
pub const MAX_FAILED_TRIAL_SAMPLES: usize = 3;

/// Decimal places kept for `pass_rate` and `reproducibility`.
pub const PASS_RATE_DECIMALS: i32 = 3;

/// A retained sample of a failing trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTrial {
    /// Zero-based trial index.
    pub trial: u32,
    /// Scoring reasons.
    pub reasons: Vec<String>,
    /// Generation output verbatim, or `{"a", "b"}` for a metamorphic pair.
    pub output: Value,
}

/// Per-case record. Field order is the persisted key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    /// Case id.
    pub id: String,
    /// Case category.
    pub category: String,
    /// Case severity.
    pub severity: i64,
    /// Trials requested.
    pub trials: u32,
    /// Trials that passed.
    pub pass_count: u32,
    /// `pass_count / trials`, rounded to three decimals.
    pub pass_rate: f64,
    /// Same value as `pass_rate`, read as a stability metric.
    pub reproducibility: f64,
    /// Pass rate strictly between the flaky thresholds.
    pub flaky: bool,
    /// Every trial passed.
    pub stable_pass: bool,
    /// No trial passed.
    pub stable_failure: bool,
    /// Per-trial wall-clock seconds, in trial order.
    pub elapsed_s: Vec<f64>,
    /// Case notes.
    pub notes: String,
    /// First failing trials, in trial order.
    pub failed_trials: Vec<FailedTrial>,
}

impl CaseResult {
    /// The verdict implied by the stored flags.
    #[must_use]
    pub const fn verdict(&self) -> Verdict {
        Verdict::from_flags(self.stable_pass, self.stable_failure, self.flaky)
    }
}

/// Builds the record for one case from its outcomes and statistics.
///
/// `outcomes` must be in trial order; the failing-trial sample keeps the
/// first failures encountered.
#[must_use]
pub fn assemble(case: &Case, outcomes: Vec<TrialOutcome>, stats: &StabilityStats) -> CaseResult {
    let pass_rate = round_to(stats.pass_rate, PASS_RATE_DECIMALS);
    let elapsed_s = outcomes.iter().map(|o| o.elapsed_seconds).collect();
    let failed_trials = outcomes
        .into_iter()
        .filter(|o| !o.passed)
        .take(MAX_FAILED_TRIAL_SAMPLES)
        .map(|o| FailedTrial {
            trial: o.index,
            reasons: o.reasons,
            output: o.output.into_value(),
        })
        .collect();

    CaseResult {
        id: case.id().to_string(),
        category: case.category().to_string(),
        severity: case.severity(),
        trials: stats.trials,
        pass_count: stats.pass_count,
        pass_rate,
        reproducibility: pass_rate,
        flaky: stats.flaky,
        stable_pass: stats.stable_pass,
        stable_failure: stats.stable_failure,
        elapsed_s,
        notes: case.notes().to_string(),
        failed_trials,
    }
}
