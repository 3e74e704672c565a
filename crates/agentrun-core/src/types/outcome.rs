//! Terminal record of a run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RunId, RunStatus};

/// Terminal status reported in a [`RunOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    Cancelled,
}

impl From<OutcomeStatus> for RunStatus {
    fn from(value: OutcomeStatus) -> Self {
        match value {
            OutcomeStatus::Completed => RunStatus::Completed,
            OutcomeStatus::Failed => RunStatus::Failed,
            OutcomeStatus::Cancelled => RunStatus::Cancelled,
        }
    }
}

/// Produced exactly once per run, when it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn completed(run_id: impl Into<RunId>, output: Value) -> Self {
        Self {
            run_id: run_id.into(),
            status: OutcomeStatus::Completed,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(run_id: impl Into<RunId>, error: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: OutcomeStatus::Failed,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn cancelled(run_id: impl Into<RunId>) -> Self {
        Self {
            run_id: run_id.into(),
            status: OutcomeStatus::Cancelled,
            output: None,
            error: None,
        }
    }

    pub fn run_status(&self) -> RunStatus {
        self.status.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_wire_shape_omits_absent_fields() {
        let done = RunOutcome::completed("r1", json!({"response": "hi"}));
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"run_id": "r1", "status": "completed", "output": {"response": "hi"}})
        );

        let cancelled = RunOutcome::cancelled("r2");
        assert_eq!(
            serde_json::to_value(&cancelled).unwrap(),
            json!({"run_id": "r2", "status": "cancelled"})
        );
        assert_eq!(cancelled.run_status(), RunStatus::Cancelled);
    }
}
