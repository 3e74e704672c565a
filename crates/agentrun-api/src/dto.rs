use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use agentrun_core::types::{RunOutcome, RunStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRunRequest {
    /// Generated when absent.
    #[serde(default)]
    pub run_id: Option<String>,
    pub tenant_id: String,
    pub agent_id: String,
    pub agent_version_id: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub input: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    AlreadyStarted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRunResponse {
    pub run_id: String,
    pub status: StartStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRunRequest {
    pub signal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRunResponse {
    pub run_id: String,
    pub signal: String,
    pub paused: bool,
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunView {
    pub run_id: String,
    pub status: RunStatus,
    pub paused: bool,
    pub cancel_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PausedView {
    pub run_id: String,
    pub paused: bool,
}

/// `finished == false` is the still-running indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeView {
    pub run_id: String,
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}
