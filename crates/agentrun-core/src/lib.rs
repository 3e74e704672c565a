//! # AgentRun Core
//!
//! Durable orchestration of agent runs.
//!
//! This crate contains:
//! - Run identity, control state and outcome definitions
//! - Activity contracts (model call, tool execution) and failure taxonomy
//! - Retry policy engine
//! - History journal model and the `HistoryStore` abstraction
//! - The run state machine (`RunWorkflow`)
//!
//! This crate does NOT care about:
//! - Where journals are persisted
//! - What the activity bodies actually call
//! - How runs are created or addressed from outside the process

pub mod activity;
pub mod history;
pub mod retry;
pub mod store;
pub mod types;
pub mod workflow;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::activity::{
        Activities, ActivityContext, ActivityError, ActivityInvocation, ActivityKind,
        ActivityOutput, ActivityRequest, ActivityTimeouts, FailureKind, ModelCallActivity,
        ModelCallInput, ModelCallOutput, ToolExecActivity, ToolExecInput, ToolExecOutput,
    };
    pub use crate::history::{HistoryEvent, RunHistory, RunStart, StepProgress};
    pub use crate::retry::{RetryDecision, RetryPolicies, RetryPolicy, RetryPolicyError};
    pub use crate::store::{HistoryStore, StoreError};
    pub use crate::types::{
        OutcomeStatus, RunConfig, RunControlState, RunId, RunIdentity, RunInput, RunOutcome,
        RunSignal, RunSnapshot, RunStatus,
    };
    pub use crate::workflow::{PlanError, RunFault, RunMessage, RunPlan, RunWorkflow};
}

// Re-export key types at crate root
pub use activity::{Activities, ActivityError, ActivityTimeouts, FailureKind};
pub use history::{HistoryEvent, RunHistory};
pub use retry::{RetryDecision, RetryPolicies, RetryPolicy};
pub use store::{HistoryStore, StoreError};
pub use types::{
    RunConfig, RunControlState, RunId, RunIdentity, RunInput, RunOutcome, RunSignal, RunSnapshot,
    RunStatus,
};
pub use workflow::{truncate_for_log, RunFault, RunMessage, RunWorkflow};
