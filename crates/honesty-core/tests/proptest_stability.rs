//! Property-based tests for classification and result assembly.

use honesty_core::stability::round_to;
use honesty_core::{
    Case, FlakyThresholds, MAX_FAILED_TRIAL_SAMPLES, TrialOutcome, TrialOutput, assemble, classify,
};
use proptest::prelude::*;
use serde_json::json;

/// Strategy for valid `(low, high)` threshold pairs.
fn thresholds_strategy() -> impl Strategy<Value = FlakyThresholds> {
    (0u32..=100, 0u32..=100)
        .prop_filter("low must be below high", |(a, b)| a != b)
        .prop_map(|(a, b)| {
            let (low, high) = if a < b { (a, b) } else { (b, a) };
            FlakyThresholds::new(f64::from(low) / 100.0, f64::from(high) / 100.0)
                .expect("ordered thresholds are valid")
        })
}

fn outcomes_for(passes: &[bool]) -> Vec<TrialOutcome> {
    passes
        .iter()
        .enumerate()
        .map(|(i, &passed)| TrialOutcome {
            index: u32::try_from(i).unwrap(),
            output: TrialOutput::Single(json!(i)),
            passed,
            reasons: Vec::new(),
            elapsed_seconds: 0.0,
        })
        .collect()
}

proptest! {
    /// Property: the pass count matches the sequence and the rate stays in [0, 1].
    #[test]
    fn prop_pass_count_and_rate(passes in prop::collection::vec(any::<bool>(), 0..64)) {
        let stats = classify(&passes, &FlakyThresholds::default());

        let expected = passes.iter().filter(|&&p| p).count();
        prop_assert_eq!(stats.pass_count as usize, expected);
        prop_assert_eq!(stats.trials as usize, passes.len());
        prop_assert!((0.0..=1.0).contains(&stats.pass_rate));
    }

    /// Property: stable pass and stable failure are never both set, and at
    /// most one of the three flags holds.
    #[test]
    fn prop_flags_mutually_exclusive(
        passes in prop::collection::vec(any::<bool>(), 0..64),
        thresholds in thresholds_strategy(),
    ) {
        let stats = classify(&passes, &thresholds);

        let set = [stats.stable_pass, stats.stable_failure, stats.flaky]
            .iter()
            .filter(|&&f| f)
            .count();
        prop_assert!(set <= 1);
        if stats.pass_rate > 0.0 && stats.pass_rate < 1.0 {
            prop_assert!(!stats.stable_pass && !stats.stable_failure);
        }
    }

    /// Property: flaky holds exactly when the rate is strictly inside the thresholds.
    #[test]
    fn prop_flaky_is_strict(
        passes in prop::collection::vec(any::<bool>(), 1..64),
        thresholds in thresholds_strategy(),
    ) {
        let stats = classify(&passes, &thresholds);

        let inside = thresholds.low() < stats.pass_rate && stats.pass_rate < thresholds.high();
        prop_assert_eq!(stats.flaky, inside);
    }

    /// Property: the assembled record keeps min(3, failures) samples in trial order.
    #[test]
    fn prop_failed_trials_bounded_and_ordered(passes in prop::collection::vec(any::<bool>(), 0..64)) {
        let stats = classify(&passes, &FlakyThresholds::default());
        let case = Case::single("p", "prop", 1, "prompt", json!({}));

        let result = assemble(&case, outcomes_for(&passes), &stats);

        let failures = passes.len() - passes.iter().filter(|&&p| p).count();
        prop_assert_eq!(result.failed_trials.len(), failures.min(MAX_FAILED_TRIAL_SAMPLES));
        prop_assert!(result.failed_trials.windows(2).all(|w| w[0].trial < w[1].trial));
        prop_assert!(result.failed_trials.iter().all(|f| !passes[f.trial as usize]));
        prop_assert_eq!(result.elapsed_s.len(), passes.len());
        prop_assert!((result.pass_rate - round_to(stats.pass_rate, 3)).abs() < f64::EPSILON);
        prop_assert!((result.reproducibility - result.pass_rate).abs() < f64::EPSILON);
    }
}
