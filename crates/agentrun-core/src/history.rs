//! Run history - append-only journal entries and their replay
//!
//! Everything a run decides is a function of its journal: inputs and policies
//! are snapshotted in `RunStarted`, activity results and failure timestamps
//! are recorded as they happen, and signals are recorded before they are
//! acknowledged. Replaying the journal rebuilds the control state and tells
//! the state machine which steps are already done.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::activity::{ActivityError, ActivityOutput, ActivityRequest, ActivityTimeouts};
use crate::retry::RetryPolicies;
use crate::types::{RunConfig, RunControlState, RunIdentity, RunInput, RunOutcome, RunSignal};

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    /// Always the first entry of a journal.
    RunStarted {
        identity: RunIdentity,
        config: RunConfig,
        input: RunInput,
        policies: RetryPolicies,
        timeouts: ActivityTimeouts,
        timestamp: DateTime<Utc>,
    },

    /// A signal that changed the control state.
    SignalReceived {
        signal: RunSignal,
        timestamp: DateTime<Utc>,
    },

    ActivityScheduled {
        step: u32,
        attempt: u32,
        request: ActivityRequest,
        timestamp: DateTime<Utc>,
    },

    ActivityCompleted {
        step: u32,
        attempt: u32,
        output: ActivityOutput,
        timestamp: DateTime<Utc>,
    },

    ActivityFailed {
        step: u32,
        attempt: u32,
        error: ActivityError,
        timestamp: DateTime<Utc>,
    },

    /// Backoff timer armed before `attempt`.
    RetryScheduled {
        step: u32,
        attempt: u32,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },

    RunFinished {
        outcome: RunOutcome,
        timestamp: DateTime<Utc>,
    },
}

impl HistoryEvent {
    pub fn run_started(
        identity: RunIdentity,
        config: RunConfig,
        input: RunInput,
        policies: RetryPolicies,
        timeouts: ActivityTimeouts,
    ) -> Self {
        Self::RunStarted {
            identity,
            config,
            input,
            policies,
            timeouts,
            timestamp: Utc::now(),
        }
    }

    pub fn signal_received(signal: RunSignal) -> Self {
        Self::SignalReceived {
            signal,
            timestamp: Utc::now(),
        }
    }

    pub fn activity_scheduled(step: u32, attempt: u32, request: ActivityRequest) -> Self {
        Self::ActivityScheduled {
            step,
            attempt,
            request,
            timestamp: Utc::now(),
        }
    }

    pub fn activity_completed(step: u32, attempt: u32, output: ActivityOutput) -> Self {
        Self::ActivityCompleted {
            step,
            attempt,
            output,
            timestamp: Utc::now(),
        }
    }

    pub fn activity_failed(step: u32, attempt: u32, error: ActivityError) -> Self {
        Self::ActivityFailed {
            step,
            attempt,
            error,
            timestamp: Utc::now(),
        }
    }

    pub fn retry_scheduled(step: u32, attempt: u32, delay: Duration) -> Self {
        Self::RetryScheduled {
            step,
            attempt,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            timestamp: Utc::now(),
        }
    }

    pub fn run_finished(outcome: RunOutcome) -> Self {
        Self::RunFinished {
            outcome,
            timestamp: Utc::now(),
        }
    }

    /// Short name used in logs and API views.
    pub fn name(&self) -> &'static str {
        match self {
            HistoryEvent::RunStarted { .. } => "run_started",
            HistoryEvent::SignalReceived { .. } => "signal_received",
            HistoryEvent::ActivityScheduled { .. } => "activity_scheduled",
            HistoryEvent::ActivityCompleted { .. } => "activity_completed",
            HistoryEvent::ActivityFailed { .. } => "activity_failed",
            HistoryEvent::RetryScheduled { .. } => "retry_scheduled",
            HistoryEvent::RunFinished { .. } => "run_finished",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            HistoryEvent::RunStarted { timestamp, .. }
            | HistoryEvent::SignalReceived { timestamp, .. }
            | HistoryEvent::ActivityScheduled { timestamp, .. }
            | HistoryEvent::ActivityCompleted { timestamp, .. }
            | HistoryEvent::ActivityFailed { timestamp, .. }
            | HistoryEvent::RetryScheduled { timestamp, .. }
            | HistoryEvent::RunFinished { timestamp, .. } => *timestamp,
        }
    }
}

/// Immutable inputs of a run, as snapshotted in `RunStarted`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStart {
    pub identity: RunIdentity,
    pub config: RunConfig,
    pub input: RunInput,
    pub policies: RetryPolicies,
    pub timeouts: ActivityTimeouts,
    pub started_at: DateTime<Utc>,
}

/// A failed attempt of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAttempt {
    pub attempt: u32,
    pub error: ActivityError,
    pub at: DateTime<Utc>,
}

/// What the journal says about one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepProgress {
    pub completed: Option<ActivityOutput>,
    pub failures: Vec<FailedAttempt>,
    /// Attempt that was scheduled but has no recorded result.
    pub in_flight: Option<u32>,
    /// Backoff armed after the last failure whose attempt was not scheduled yet.
    pub pending_retry: Option<Duration>,
    pub first_attempted_at: Option<DateTime<Utc>>,
}

impl StepProgress {
    pub fn last_failure(&self) -> Option<&FailedAttempt> {
        self.failures.last()
    }

    /// Highest attempt number that reached the journal.
    pub fn attempts_recorded(&self) -> u32 {
        let failed = self.failures.last().map_or(0, |f| f.attempt);
        failed.max(self.in_flight.unwrap_or(0))
    }
}

/// Replay view over a journal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunHistory {
    events: Vec<HistoryEvent>,
}

impl RunHistory {
    pub fn new(events: Vec<HistoryEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    pub fn push(&mut self, event: HistoryEvent) {
        self.events.push(event);
    }

    /// Run inputs; `None` unless the journal opens with `RunStarted`.
    pub fn start(&self) -> Option<RunStart> {
        match self.events.first()? {
            HistoryEvent::RunStarted {
                identity,
                config,
                input,
                policies,
                timeouts,
                timestamp,
            } => Some(RunStart {
                identity: identity.clone(),
                config: config.clone(),
                input: input.clone(),
                policies: *policies,
                timeouts: *timeouts,
                started_at: *timestamp,
            }),
            _ => None,
        }
    }

    /// Control state rebuilt from recorded signals only.
    pub fn control_state(&self) -> RunControlState {
        let signals: Vec<RunSignal> = self
            .events
            .iter()
            .filter_map(|event| match event {
                HistoryEvent::SignalReceived { signal, .. } => Some(*signal),
                _ => None,
            })
            .collect();
        RunControlState::replay(&signals)
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.events.iter().find_map(|event| match event {
            HistoryEvent::RunFinished { outcome, .. } => Some(outcome),
            _ => None,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }

    pub fn step(&self, step: u32) -> StepProgress {
        let mut progress = StepProgress::default();
        for event in &self.events {
            match event {
                HistoryEvent::ActivityScheduled {
                    step: s,
                    attempt,
                    timestamp,
                    ..
                } if *s == step => {
                    progress.first_attempted_at.get_or_insert(*timestamp);
                    progress.in_flight = Some(*attempt);
                    progress.pending_retry = None;
                }
                HistoryEvent::RetryScheduled { step: s, delay_ms, .. } if *s == step => {
                    progress.pending_retry = Some(Duration::from_millis(*delay_ms));
                }
                HistoryEvent::ActivityCompleted { step: s, output, .. } if *s == step => {
                    progress.completed = Some(output.clone());
                    progress.in_flight = None;
                }
                HistoryEvent::ActivityFailed {
                    step: s,
                    attempt,
                    error,
                    timestamp,
                } if *s == step => {
                    progress.failures.push(FailedAttempt {
                        attempt: *attempt,
                        error: error.clone(),
                        at: *timestamp,
                    });
                    progress.in_flight = None;
                }
                _ => {}
            }
        }
        progress
    }
}

impl From<Vec<HistoryEvent>> for RunHistory {
    fn from(value: Vec<HistoryEvent>) -> Self {
        Self::new(value)
    }
}
