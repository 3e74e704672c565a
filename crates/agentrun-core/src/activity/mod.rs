//! Activity contracts
//!
//! Activities are the only place a run touches the outside world:
//! - ModelCall: one model-inference call
//! - ToolExec: one tool execution
//!
//! # Delivery contract
//!
//! Activities are dispatched **at least once**. After a host restart an
//! attempt that was in flight is dispatched again with the same
//! [`ActivityContext::idempotency_key`]. Implementations must therefore be
//! idempotent, or deduplicate on that key. The orchestration core does not
//! enforce this; it is a requirement on the activity bodies.

mod contracts;
mod error;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use contracts::{
    ModelCallInput, ModelCallOutput, ToolExecInput, ToolExecOutput, DEFAULT_MODEL,
    DEFAULT_TEMPERATURE, DEFAULT_TOOL_TIMEOUT_SECONDS,
};
pub use error::{ActivityError, FailureKind};

use crate::types::RunId;

/// Default start-to-close timeout of a model call.
pub const DEFAULT_MODEL_CALL_TIMEOUT: Duration = Duration::from_secs(300);
/// Slack added on top of a tool's own `timeout_seconds`.
pub const DEFAULT_TOOL_EXEC_GRACE: Duration = Duration::from_secs(5);

/// The two invocable operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ModelCall,
    ToolExec,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityKind::ModelCall => f.write_str("model_call"),
            ActivityKind::ToolExec => f.write_str("tool_exec"),
        }
    }
}

/// Input of one activity invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "input", rename_all = "snake_case")]
pub enum ActivityRequest {
    ModelCall(ModelCallInput),
    ToolExec(ToolExecInput),
}

impl ActivityRequest {
    pub fn kind(&self) -> ActivityKind {
        match self {
            ActivityRequest::ModelCall(_) => ActivityKind::ModelCall,
            ActivityRequest::ToolExec(_) => ActivityKind::ToolExec,
        }
    }
}

/// Result of one successful activity invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "output", rename_all = "snake_case")]
pub enum ActivityOutput {
    ModelCall(ModelCallOutput),
    ToolExec(ToolExecOutput),
}

impl ActivityOutput {
    pub fn kind(&self) -> ActivityKind {
        match self {
            ActivityOutput::ModelCall(_) => ActivityKind::ModelCall,
            ActivityOutput::ToolExec(_) => ActivityKind::ToolExec,
        }
    }
}

/// Context handed to an activity body.
#[derive(Clone)]
pub struct ActivityContext {
    pub run_id: RunId,
    /// Position of the step in the run plan (0-based).
    pub step: u32,
    /// Attempt number of this step (1-based).
    pub attempt: u32,
    /// Stable across redelivery of the same attempt.
    pub idempotency_key: String,
    /// Raised when the run is cancelled. Purely advisory: the orchestrator
    /// never preempts an in-flight activity.
    pub cancellation: CancellationToken,
}

impl ActivityContext {
    pub fn new(run_id: impl Into<RunId>, step: u32, attempt: u32) -> Self {
        let run_id = run_id.into();
        Self {
            idempotency_key: idempotency_key(&run_id, step, attempt),
            run_id,
            step,
            attempt,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl fmt::Debug for ActivityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityContext")
            .field("run_id", &self.run_id)
            .field("step", &self.step)
            .field("attempt", &self.attempt)
            .field("idempotency_key", &self.idempotency_key)
            .finish_non_exhaustive()
    }
}

pub fn idempotency_key(run_id: &RunId, step: u32, attempt: u32) -> String {
    format!("{}:{}:{}", run_id, step, attempt)
}

/// One logical step being attempted.
///
/// `attempt_count` grows on every retry of the same step; the invocation is
/// dropped once the step succeeds or gives up.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityInvocation {
    pub step: u32,
    pub request: ActivityRequest,
    pub attempt_count: u32,
    pub first_attempted_at: Option<DateTime<Utc>>,
}

impl ActivityInvocation {
    pub fn new(step: u32, request: ActivityRequest) -> Self {
        Self {
            step,
            request,
            attempt_count: 0,
            first_attempted_at: None,
        }
    }

    pub fn kind(&self) -> ActivityKind {
        self.request.kind()
    }

    /// Register the start of the next attempt and return its number.
    pub fn begin_attempt(&mut self, at: DateTime<Utc>) -> u32 {
        self.attempt_count += 1;
        self.first_attempted_at.get_or_insert(at);
        self.attempt_count
    }

    /// Time between the first attempt and `now`; zero if nothing was attempted.
    pub fn elapsed_since_first_attempt(&self, now: DateTime<Utc>) -> Duration {
        self.first_attempted_at
            .and_then(|first| (now - first).to_std().ok())
            .unwrap_or_default()
    }
}

/// Model inference body.
#[async_trait]
pub trait ModelCallActivity: Send + Sync {
    async fn call(
        &self,
        input: ModelCallInput,
        ctx: ActivityContext,
    ) -> Result<ModelCallOutput, ActivityError>;
}

/// Tool execution body.
#[async_trait]
pub trait ToolExecActivity: Send + Sync {
    async fn execute(
        &self,
        input: ToolExecInput,
        ctx: ActivityContext,
    ) -> Result<ToolExecOutput, ActivityError>;
}

/// Start-to-close timeouts per activity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTimeouts {
    pub model_call: Duration,
    pub tool_exec_grace: Duration,
}

impl Default for ActivityTimeouts {
    fn default() -> Self {
        Self {
            model_call: DEFAULT_MODEL_CALL_TIMEOUT,
            tool_exec_grace: DEFAULT_TOOL_EXEC_GRACE,
        }
    }
}

impl ActivityTimeouts {
    pub fn for_request(&self, request: &ActivityRequest) -> Duration {
        match request {
            ActivityRequest::ModelCall(_) => self.model_call,
            ActivityRequest::ToolExec(input) => {
                Duration::from_secs(input.timeout_seconds).saturating_add(self.tool_exec_grace)
            }
        }
    }
}

/// The activity bodies registered with a host.
#[derive(Clone)]
pub struct Activities {
    pub model_call: Arc<dyn ModelCallActivity>,
    pub tool_exec: Arc<dyn ToolExecActivity>,
}

impl Activities {
    pub fn new(
        model_call: Arc<dyn ModelCallActivity>,
        tool_exec: Arc<dyn ToolExecActivity>,
    ) -> Self {
        Self {
            model_call,
            tool_exec,
        }
    }

    /// Invoke the body matching `request`, bounded by `timeout`.
    ///
    /// Exceeding the timeout is reported as a retryable transient failure.
    pub async fn dispatch(
        &self,
        request: ActivityRequest,
        ctx: ActivityContext,
        timeout: Duration,
    ) -> Result<ActivityOutput, ActivityError> {
        let kind = request.kind();
        let invocation = async {
            match request {
                ActivityRequest::ModelCall(input) => self
                    .model_call
                    .call(input, ctx)
                    .await
                    .map(ActivityOutput::ModelCall),
                ActivityRequest::ToolExec(input) => self
                    .tool_exec
                    .execute(input, ctx)
                    .await
                    .map(ActivityOutput::ToolExec),
            }
        };

        match tokio::time::timeout(timeout, invocation).await {
            Ok(result) => result,
            Err(_) => Err(ActivityError::TransientUpstream(format!(
                "{} exceeded start-to-close timeout of {}ms",
                kind,
                timeout.as_millis()
            ))),
        }
    }
}
