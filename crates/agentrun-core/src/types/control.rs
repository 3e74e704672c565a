//! Control state driven by external signals, and the lifecycle state of a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::RunOutcome;

/// Asynchronous, fire-and-forget instruction delivered to a running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSignal {
    Pause,
    Resume,
    Cancel,
}

impl RunSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunSignal::Pause => "pause",
            RunSignal::Resume => "resume",
            RunSignal::Cancel => "cancel",
        }
    }
}

impl fmt::Display for RunSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown signal name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown signal '{0}' (expected pause, resume or cancel)")]
pub struct UnknownSignal(pub String);

impl FromStr for RunSignal {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Ok(RunSignal::Pause),
            "resume" => Ok(RunSignal::Resume),
            "cancel" => Ok(RunSignal::Cancel),
            other => Err(UnknownSignal(other.to_string())),
        }
    }
}

/// Mutable control flags of a single run.
///
/// Owned by the run's state machine and mutated only by signals, never by
/// activity results. `cancel_requested` is monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunControlState {
    pub paused: bool,
    pub cancel_requested: bool,
}

impl RunControlState {
    /// Return the state after `signal` is applied.
    pub fn applied(self, signal: RunSignal) -> Self {
        match signal {
            // Pausing a cancelled run would only delay the cancellation.
            RunSignal::Pause if self.cancel_requested => self,
            RunSignal::Pause => Self {
                paused: true,
                ..self
            },
            RunSignal::Resume => Self {
                paused: false,
                ..self
            },
            RunSignal::Cancel => Self {
                paused: false,
                cancel_requested: true,
            },
        }
    }

    /// Apply `signal` in place; returns whether anything changed.
    pub fn apply(&mut self, signal: RunSignal) -> bool {
        let next = self.applied(signal);
        let changed = next != *self;
        *self = next;
        changed
    }

    /// Fold a sequence of signals from the default state.
    pub fn replay<'a>(signals: impl IntoIterator<Item = &'a RunSignal>) -> Self {
        signals
            .into_iter()
            .fold(Self::default(), |state, signal| state.applied(*signal))
    }
}

/// Lifecycle state of a run.
///
/// `Created → Running → {Paused ⇄ Running} → {Completed | Failed | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Check if the run is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Whether moving to `next` is a legal lifecycle transition.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Created, Running) => true,
            (Created, Completed | Failed | Cancelled) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Running | Paused, Completed | Failed | Cancelled) => true,
            (a, b) if *a == b => !a.is_terminal() && *a != Created,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a run published for side-effect-free queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub status: RunStatus,
    pub control: RunControlState,
    #[serde(default)]
    pub outcome: Option<RunOutcome>,
}

impl RunSnapshot {
    pub fn created(control: RunControlState) -> Self {
        Self {
            status: RunStatus::Created,
            control,
            outcome: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.control.paused
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
