//! Run summaries.
//!
//! The orchestrator hands every [`CaseResult`] to a [`Summarizer`] once the
//! run finishes and stores whatever comes back verbatim. The shape of the
//! summary is the summarizer's business.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Value, json};

use crate::result::CaseResult;
use crate::stability::{Verdict, round_to};

/// Produces an opaque summary from the full result list.
pub trait Summarizer: Send + Sync + fmt::Debug {
    /// Summarizes `results`, which are in suite order.
    ///
    /// Must accept an empty slice.
    fn summarize(&self, results: &[CaseResult]) -> Value;
}

/// Verdict counters shared by the overall and per-category sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerdictCounts {
    /// Cases counted.
    pub total_cases: usize,
    /// Cases that passed every trial.
    pub stable_pass: usize,
    /// Cases that passed no trial.
    pub stable_failure: usize,
    /// Cases strictly between the flaky thresholds.
    pub flaky: usize,
    /// Cases that are none of the above.
    pub unclassified: usize,
    /// Mean of the per-case pass rates, three decimals.
    pub mean_pass_rate: f64,
    /// `sum(severity * (1 - pass_rate))`, three decimals.
    pub weighted_failure: f64,
}

/// Summary produced by [`DefaultSummarizer`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Overall counters.
    #[serde(flatten)]
    pub overall: VerdictCounts,
    /// Counters per category, sorted by category name.
    pub by_category: BTreeMap<String, VerdictCounts>,
    /// Ids of flaky cases, in suite order.
    pub flaky_ids: Vec<String>,
    /// Ids of stable failures, in suite order.
    pub stable_failure_ids: Vec<String>,
}

impl RunSummary {
    /// Builds the summary for `results`.
    #[must_use]
    pub fn from_results(results: &[CaseResult]) -> Self {
        let mut grouped: BTreeMap<String, Vec<&CaseResult>> = BTreeMap::new();
        for result in results {
            grouped.entry(result.category.clone()).or_default().push(result);
        }

        let ids_with = |verdict: Verdict| {
            results
                .iter()
                .filter(|r| r.verdict() == verdict)
                .map(|r| r.id.clone())
                .collect()
        };

        Self {
            overall: count(results.iter()),
            by_category: grouped
                .into_iter()
                .map(|(category, members)| (category, count(members.into_iter())))
                .collect(),
            flaky_ids: ids_with(Verdict::Flaky),
            stable_failure_ids: ids_with(Verdict::StableFailure),
        }
    }
}

fn count<'a>(results: impl Iterator<Item = &'a CaseResult>) -> VerdictCounts {
    let mut counts = VerdictCounts::default();
    let mut rate_sum = 0.0;
    let mut weighted = 0.0;

    for result in results {
        counts.total_cases += 1;
        match result.verdict() {
            Verdict::StablePass => counts.stable_pass += 1,
            Verdict::StableFailure => counts.stable_failure += 1,
            Verdict::Flaky => counts.flaky += 1,
            Verdict::Unclassified => counts.unclassified += 1,
        }
        rate_sum += result.pass_rate;
        #[allow(clippy::cast_precision_loss)]
        let severity = result.severity as f64;
        weighted += severity * (1.0 - result.pass_rate);
    }

    if counts.total_cases > 0 {
        #[allow(clippy::cast_precision_loss)]
        let n = counts.total_cases as f64;
        counts.mean_pass_rate = round_to(rate_sum / n, 3);
    }
    counts.weighted_failure = round_to(weighted, 3);
    counts
}

/// The built-in summarizer: verdict totals, a severity-weighted failure
/// score, and a per-category breakdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSummarizer;

impl Summarizer for DefaultSummarizer {
    fn summarize(&self, results: &[CaseResult]) -> Value {
        serde_json::to_value(RunSummary::from_results(results))
            .unwrap_or_else(|e| json!({ "error": e.to_string() }))
    }
}
