//! Execution policy.
//!
//! The defaults reproduce the baseline behavior: sequential cases, no
//! timeout, no retry, and the first collaborator failure aborts the run.
//! Every stronger guarantee is opt-in.

use std::time::Duration;

use crate::error::HarnessError;

/// Upper bound on case-parallel workers.
pub const MAX_CONCURRENCY: usize = 64;

/// Upper bound on per-trial retries.
pub const MAX_RETRIES: u32 = 10;

/// How cases are scheduled. Trials within a case are always sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    /// One case at a time, in suite order.
    #[default]
    Sequential,
    /// Up to `max_concurrency` cases at once. Results keep suite order;
    /// elapsed figures become wall-clock-under-contention.
    CaseParallel {
        /// Worker bound.
        max_concurrency: usize,
    },
}

/// Timeout, retry, isolation and scheduling settings for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionPolicy {
    /// Bound on each generation call. `None` waits indefinitely.
    pub trial_timeout: Option<Duration>,
    /// How many times a trial is re-run after a retriable failure.
    pub max_retries: u32,
    /// Record a failing case and keep going instead of aborting the run.
    pub isolate_case_failures: bool,
    /// Case scheduling strategy.
    pub schedule: Schedule,
}

impl ExecutionPolicy {
    /// The baseline policy.
    #[must_use]
    pub const fn baseline() -> Self {
        Self {
            trial_timeout: None,
            max_retries: 0,
            isolate_case_failures: false,
            schedule: Schedule::Sequential,
        }
    }

    /// Sets the per-call generation timeout.
    #[must_use]
    pub const fn with_trial_timeout(mut self, timeout: Duration) -> Self {
        self.trial_timeout = Some(timeout);
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Enables or disables per-case isolation.
    #[must_use]
    pub const fn with_isolation(mut self, isolate: bool) -> Self {
        self.isolate_case_failures = isolate;
        self
    }

    /// Sets the scheduling strategy.
    #[must_use]
    pub const fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Checks the policy bounds.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidPolicy`] for a zero timeout, more than
    /// [`MAX_RETRIES`] retries, or a worker count outside
    /// `1..=MAX_CONCURRENCY`.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.trial_timeout.is_some_and(|t| t.is_zero()) {
            return Err(HarnessError::InvalidPolicy(
                "trial timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_retries > MAX_RETRIES {
            return Err(HarnessError::InvalidPolicy(format!(
                "max_retries {} exceeds limit of {MAX_RETRIES}",
                self.max_retries
            )));
        }
        if let Schedule::CaseParallel { max_concurrency } = self.schedule {
            if max_concurrency == 0 || max_concurrency > MAX_CONCURRENCY {
                return Err(HarnessError::InvalidPolicy(format!(
                    "max_concurrency must be in 1..={MAX_CONCURRENCY}, got {max_concurrency}"
                )));
            }
        }
        Ok(())
    }
}
