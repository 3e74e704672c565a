//! Host-level errors.

use thiserror::Error;

use agentrun_core::retry::RetryPolicyError;
use agentrun_core::store::StoreError;
use agentrun_core::types::RunId;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("run not found: {0}")]
    RunNotFound(RunId),

    #[error("invalid run id: {0}")]
    InvalidRunId(String),

    #[error("run {0} already exists with a different identity")]
    IdentityConflict(RunId),

    #[error("invalid retry policy: {0}")]
    InvalidPolicy(#[from] RetryPolicyError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("journal of run {run_id} cannot be replayed: {message}")]
    Replay { run_id: RunId, message: String },

    #[error("run {0} did not acknowledge the signal")]
    SignalNotAcknowledged(RunId),

    #[error("orchestrator is shut down")]
    ShutDown,
}
