use async_trait::async_trait;

use crate::dto::{OutcomeView, RunView, SignalRunResponse, StartRunRequest, StartRunResponse};
use crate::ApiError;

/// Operations the control plane uses to drive runs.
#[async_trait]
pub trait ApiService: Send + Sync {
    /// Accept a run. Idempotent per run id.
    async fn start_run(&self, request: StartRunRequest) -> Result<StartRunResponse, ApiError>;

    /// Deliver `pause`, `resume` or `cancel`. Inapplicable signals are no-ops.
    async fn signal_run(&self, run_id: &str, signal: &str)
        -> Result<SignalRunResponse, ApiError>;

    async fn query_run_paused(&self, run_id: &str) -> Result<bool, ApiError>;

    async fn get_run_outcome(&self, run_id: &str) -> Result<OutcomeView, ApiError>;

    async fn get_run(&self, run_id: &str) -> Result<RunView, ApiError>;
}
