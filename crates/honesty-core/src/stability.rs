//! Stability classification of trial outcomes.
//!
//! A pass/fail sequence reduces to a pass rate and three flags:
//!
//! - `stable_pass` iff the rate is exactly 1.0
//! - `stable_failure` iff the rate is exactly 0.0
//! - `flaky` iff `low < rate < high` (strict on both ends)
//!
//! A rate can satisfy none of them (0.1 with the default thresholds), and a
//! rate sitting exactly on a threshold is never flaky. Both are valid
//! outcomes, not errors.

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Default lower flaky threshold.
pub const DEFAULT_FLAKY_LOW: f64 = 0.2;

/// Default upper flaky threshold.
pub const DEFAULT_FLAKY_HIGH: f64 = 0.8;

/// Validated flaky thresholds, `0 <= low < high <= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlakyThresholds {
    low: f64,
    high: f64,
}

impl FlakyThresholds {
    /// Creates thresholds after checking the ordering invariant.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidThresholds`] unless
    /// `0 <= low < high <= 1`.
    pub fn new(low: f64, high: f64) -> Result<Self, HarnessError> {
        if (0.0..=1.0).contains(&low) && (0.0..=1.0).contains(&high) && low < high {
            Ok(Self { low, high })
        } else {
            Err(HarnessError::InvalidThresholds { low, high })
        }
    }

    /// Lower threshold.
    #[must_use]
    pub const fn low(&self) -> f64 {
        self.low
    }

    /// Upper threshold.
    #[must_use]
    pub const fn high(&self) -> f64 {
        self.high
    }

    /// Returns `true` if `pass_rate` lies strictly between the thresholds.
    #[must_use]
    pub fn is_flaky(&self, pass_rate: f64) -> bool {
        self.low < pass_rate && pass_rate < self.high
    }
}

impl Default for FlakyThresholds {
    fn default() -> Self {
        Self {
            low: DEFAULT_FLAKY_LOW,
            high: DEFAULT_FLAKY_HIGH,
        }
    }
}

/// The reproducibility verdict of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Every trial passed.
    StablePass,
    /// No trial passed.
    StableFailure,
    /// Pass rate strictly between the thresholds.
    Flaky,
    /// None of the above.
    Unclassified,
}

impl Verdict {
    /// Collapses the three persisted flags into a verdict.
    ///
    /// The flags are mutually exclusive for valid thresholds; if several are
    /// set anyway, stable pass wins over stable failure, which wins over
    /// flaky.
    #[must_use]
    pub const fn from_flags(stable_pass: bool, stable_failure: bool, flaky: bool) -> Self {
        if stable_pass {
            Self::StablePass
        } else if stable_failure {
            Self::StableFailure
        } else if flaky {
            Self::Flaky
        } else {
            Self::Unclassified
        }
    }

    /// Console status label: `PASS`, `FLAKY` or `FAIL`.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::StablePass => "PASS",
            Self::Flaky => "FLAKY",
            Self::StableFailure | Self::Unclassified => "FAIL",
        }
    }

    /// Snake-case identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StablePass => "stable_pass",
            Self::StableFailure => "stable_failure",
            Self::Flaky => "flaky",
            Self::Unclassified => "unclassified",
        }
    }
}

/// Aggregate statistics over one case's trials.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityStats {
    /// Number of trials.
    pub trials: u32,
    /// Number of passing trials.
    pub pass_count: u32,
    /// `pass_count / trials`, unrounded; 0.0 when there were no trials.
    pub pass_rate: f64,
    /// Pass rate strictly between the thresholds.
    pub flaky: bool,
    /// Pass rate exactly 1.0.
    pub stable_pass: bool,
    /// Pass rate exactly 0.0.
    pub stable_failure: bool,
}

impl StabilityStats {
    /// Collapses the flags into a single verdict.
    #[must_use]
    pub const fn verdict(&self) -> Verdict {
        Verdict::from_flags(self.stable_pass, self.stable_failure, self.flaky)
    }
}

/// Classifies a pass/fail sequence.
///
/// Zero trials classify as a stable failure with a 0.0 pass rate.
#[must_use]
pub fn classify(passes: &[bool], thresholds: &FlakyThresholds) -> StabilityStats {
    let trials = saturating_u32(passes.len());
    let pass_count = saturating_u32(passes.iter().filter(|&&passed| passed).count());
    let pass_rate = if trials == 0 {
        0.0
    } else {
        f64::from(pass_count) / f64::from(trials)
    };

    #[allow(clippy::float_cmp)]
    let (stable_pass, stable_failure) = (pass_rate == 1.0, pass_rate == 0.0);

    StabilityStats {
        trials,
        pass_count,
        pass_rate,
        flaky: thresholds.is_flaky(pass_rate),
        stable_pass,
        stable_failure,
    }
}

/// Rounds to `places` decimal places.
///
/// Works on the exact binary value and breaks exact ties toward the even
/// digit, so `0.0625` becomes `0.062` while `0.1875` becomes `0.188`.
/// Negative `places` are treated as zero.
#[must_use]
pub fn round_to(value: f64, places: i32) -> f64 {
    let precision = usize::try_from(places).unwrap_or(0);
    format!("{value:.precision$}").parse().unwrap_or(value)
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
