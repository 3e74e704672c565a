//! Retry policy engine
//!
//! Pure decision function: given how many attempts a step has used, how long
//! ago it was first attempted and what kind of failure just happened, decide
//! whether to retry and after how long.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::activity::{ActivityKind, FailureKind};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_COEFFICIENT: f64 = 2.0;
/// 100x the initial interval.
pub const DEFAULT_MAXIMUM_INTERVAL: Duration = Duration::from_secs(100);

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `after`, then run the next attempt.
    Retry { after: Duration },
    /// Surface the last failure as a terminal step failure.
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryPolicyError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("backoff_coefficient must be >= 1.0, got {0}")]
    CoefficientBelowOne(f64),
    #[error("maximum_interval ({maximum:?}) must not be below initial_interval ({initial:?})")]
    CapBelowInitial { initial: Duration, maximum: Duration },
}

/// Exponential backoff policy for one activity kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    /// Cap applied to every computed wait.
    pub maximum_interval: Duration,
    /// Give up once this much time has passed since the first attempt.
    #[serde(default)]
    pub maximum_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            backoff_coefficient: DEFAULT_BACKOFF_COEFFICIENT,
            maximum_interval: DEFAULT_MAXIMUM_INTERVAL,
            maximum_elapsed: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_intervals(mut self, initial: Duration, maximum: Duration) -> Self {
        self.initial_interval = initial;
        self.maximum_interval = maximum.max(initial);
        self
    }

    pub fn validate(&self) -> Result<(), RetryPolicyError> {
        if self.max_attempts == 0 {
            return Err(RetryPolicyError::ZeroAttempts);
        }
        if self.backoff_coefficient.is_nan() || self.backoff_coefficient < 1.0 {
            return Err(RetryPolicyError::CoefficientBelowOne(
                self.backoff_coefficient,
            ));
        }
        if self.maximum_interval < self.initial_interval {
            return Err(RetryPolicyError::CapBelowInitial {
                initial: self.initial_interval,
                maximum: self.maximum_interval,
            });
        }
        Ok(())
    }

    /// Wait before attempt `attempt_count + 1`:
    /// `min(initial * coefficient^(attempt_count - 1), maximum_interval)`.
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let initial = self.initial_interval.as_secs_f64();
        let cap = self.maximum_interval.as_secs_f64();
        let raw = initial * self.backoff_coefficient.powi(exponent);
        if !raw.is_finite() || raw >= cap {
            return self.maximum_interval;
        }
        Duration::from_secs_f64(raw.max(0.0))
    }

    /// Decide what to do after attempt number `attempt_count` failed.
    pub fn decide(
        &self,
        attempt_count: u32,
        elapsed_since_first_attempt: Duration,
        failure: FailureKind,
    ) -> RetryDecision {
        if !failure.is_retryable() {
            return RetryDecision::GiveUp;
        }
        if attempt_count >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        if let Some(limit) = self.maximum_elapsed {
            if elapsed_since_first_attempt >= limit {
                return RetryDecision::GiveUp;
            }
        }
        RetryDecision::Retry {
            after: self.backoff(attempt_count),
        }
    }
}

/// Retry policies per activity kind.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RetryPolicies {
    pub model_call: RetryPolicy,
    pub tool_exec: RetryPolicy,
}

impl RetryPolicies {
    pub fn for_kind(&self, kind: ActivityKind) -> &RetryPolicy {
        match kind {
            ActivityKind::ModelCall => &self.model_call,
            ActivityKind::ToolExec => &self.tool_exec,
        }
    }

    pub fn validate(&self) -> Result<(), RetryPolicyError> {
        self.model_call.validate()?;
        self.tool_exec.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: FailureKind = FailureKind::TransientUpstream;

    #[test]
    fn test_default_policy_waits_one_then_two_seconds_then_gives_up() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1, Duration::ZERO, T),
            RetryDecision::Retry {
                after: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.decide(2, Duration::from_secs(1), T),
            RetryDecision::Retry {
                after: Duration::from_secs(2)
            }
        );
        assert_eq!(policy.decide(3, Duration::from_secs(3), T), RetryDecision::GiveUp);
    }

    #[test]
    fn test_non_retryable_failures_give_up_on_first_attempt() {
        let policy = RetryPolicy::default();
        for kind in [FailureKind::InvalidRequest, FailureKind::ToolNotFound] {
            assert_eq!(policy.decide(1, Duration::ZERO, kind), RetryDecision::GiveUp);
        }
        assert!(matches!(
            policy.decide(1, Duration::ZERO, FailureKind::ToolInfrastructure),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default()
            .with_max_attempts(50)
            .with_intervals(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(5), Duration::from_secs(10));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    #[test]
    fn test_maximum_elapsed_stops_retries() {
        let policy = RetryPolicy {
            max_attempts: 10,
            maximum_elapsed: Some(Duration::from_secs(30)),
            ..RetryPolicy::default()
        };
        assert!(matches!(
            policy.decide(2, Duration::from_secs(29), T),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(policy.decide(2, Duration::from_secs(30), T), RetryDecision::GiveUp);
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        assert_eq!(
            RetryPolicy::default().with_max_attempts(0).validate(),
            Err(RetryPolicyError::ZeroAttempts)
        );
        let shrinking = RetryPolicy {
            backoff_coefficient: 0.5,
            ..RetryPolicy::default()
        };
        assert!(matches!(
            shrinking.validate(),
            Err(RetryPolicyError::CoefficientBelowOne(_))
        ));
        let inverted = RetryPolicy {
            maximum_interval: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(RetryPolicyError::CapBelowInitial { .. })
        ));
        assert!(RetryPolicies::default().validate().is_ok());
    }

    #[test]
    fn test_zero_interval_policy_retries_immediately() {
        let policy = RetryPolicy::default().with_intervals(Duration::ZERO, Duration::ZERO);
        assert_eq!(
            policy.decide(1, Duration::ZERO, T),
            RetryDecision::Retry {
                after: Duration::ZERO
            }
        );
    }
}
