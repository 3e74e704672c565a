//! Run state machine
//!
//! One [`RunWorkflow`] drives one run. It is the single owner of the run's
//! control state: signals arrive as [`RunMessage`]s on an mpsc inbox and are
//! drained only at suspension points:
//!
//! - waiting for `paused == false` before a step,
//! - waiting out a retry backoff (cancel interrupts the wait),
//! - waiting for an in-flight activity (never interrupted).
//!
//! Every decision is journaled through the [`HistoryStore`] before it takes
//! effect, so a workflow rebuilt from the same journal continues exactly where
//! the previous one stopped.

mod plan;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

pub use plan::{PlanError, RunPlan, ToolFailurePolicy, DEFAULT_PROMPT};

use crate::activity::{
    Activities, ActivityContext, ActivityError, ActivityInvocation, ActivityOutput,
    ActivityRequest, ToolExecOutput,
};
use crate::history::{HistoryEvent, RunHistory, RunStart};
use crate::retry::RetryDecision;
use crate::store::{HistoryStore, StoreError};
use crate::types::{RunControlState, RunId, RunOutcome, RunSignal, RunSnapshot, RunStatus};

const MAX_LOG_TEXT_CHARS: usize = 200;

/// Message delivered to a run's inbox.
#[derive(Debug)]
pub enum RunMessage {
    /// Apply a signal. `ack` receives the control state once the signal is
    /// durably recorded (or found to change nothing).
    Signal {
        signal: RunSignal,
        ack: Option<oneshot::Sender<RunControlState>>,
    },
}

impl RunMessage {
    pub fn signal(signal: RunSignal) -> (Self, oneshot::Receiver<RunControlState>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Signal {
                signal,
                ack: Some(tx),
            },
            rx,
        )
    }
}

/// Failure of the orchestration logic itself, as opposed to an activity failure.
#[derive(Debug, Error)]
pub enum RunFault {
    #[error("journal write failed: {0}")]
    Store(#[from] StoreError),

    #[error("history replay failed: {0}")]
    Replay(String),

    /// The host dropped the inbox while the run was waiting for a signal.
    #[error("run detached from its host")]
    Detached,
}

/// Outcome of a pre-step checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Checkpoint {
    Proceed,
    Cancelled,
}

enum StepResult {
    Done(ActivityOutput),
    GaveUp(String),
    Cancelled,
}

/// Where a step continues from.
enum Next {
    Attempt,
    Redeliver(u32),
    Decide {
        error: ActivityError,
        at: DateTime<Utc>,
    },
    Backoff(Duration),
}

enum Wake<T> {
    Ready(T),
    Message(Option<RunMessage>),
}

/// State machine of one run.
pub struct RunWorkflow {
    run_id: RunId,
    start: RunStart,
    history: RunHistory,
    store: Arc<dyn HistoryStore>,
    activities: Activities,
    inbox: mpsc::Receiver<RunMessage>,
    inbox_open: bool,
    snapshot: Arc<watch::Sender<RunSnapshot>>,
    control: RunControlState,
    status: RunStatus,
    cancellation: CancellationToken,
}

impl RunWorkflow {
    /// Rebuild a workflow from its journal.
    ///
    /// A fresh run is just a journal holding only `RunStarted`.
    pub fn from_history(
        history: RunHistory,
        store: Arc<dyn HistoryStore>,
        activities: Activities,
        inbox: mpsc::Receiver<RunMessage>,
        snapshot: Arc<watch::Sender<RunSnapshot>>,
    ) -> Result<Self, RunFault> {
        let start = history
            .start()
            .ok_or_else(|| RunFault::Replay("journal does not open with run_started".into()))?;
        let control = history.control_state();
        let cancellation = CancellationToken::new();
        if control.cancel_requested {
            cancellation.cancel();
        }
        Ok(Self {
            run_id: start.identity.run_id.clone(),
            start,
            history,
            store,
            activities,
            inbox,
            inbox_open: true,
            snapshot,
            control,
            status: RunStatus::Created,
            cancellation,
        })
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Drive the run to a terminal state.
    ///
    /// Returns `None` when the run was detached from its host before
    /// finishing or its outcome could not be journaled. The journal is then
    /// left open for recovery and nothing may be reported.
    pub async fn run(mut self) -> Option<RunOutcome> {
        if let Some(outcome) = self.history.outcome().cloned() {
            self.transition(outcome.run_status());
            self.publish(Some(outcome.clone()));
            return Some(outcome);
        }

        let outcome = match self.drive().await {
            Ok(outcome) => outcome,
            Err(RunFault::Detached) => {
                tracing::info!(run_id = %self.run_id, "run detached before finishing");
                return None;
            }
            Err(fault) => {
                tracing::error!(run_id = %self.run_id, error = %fault, "orchestration fault");
                RunOutcome::failed(self.run_id.clone(), format!("orchestration fault: {}", fault))
            }
        };
        self.finish(outcome).await
    }

    async fn drive(&mut self) -> Result<RunOutcome, RunFault> {
        self.drain_inbox().await?;
        self.transition(RunStatus::Running);
        self.publish(None);
        tracing::info!(
            run_id = %self.run_id,
            tenant_id = %self.start.identity.tenant_id,
            agent_id = %self.start.identity.agent_id,
            replayed_events = self.history.events().len(),
            "run started"
        );

        if self.control.cancel_requested {
            return Ok(RunOutcome::cancelled(self.run_id.clone()));
        }

        let plan = match RunPlan::build(&self.start.config, &self.start.input) {
            Ok(plan) => plan,
            Err(error) => {
                tracing::warn!(run_id = %self.run_id, error = %error, "invalid run plan");
                return Ok(RunOutcome::failed(self.run_id.clone(), error.to_string()));
            }
        };

        let mut tool_results: Vec<ToolExecOutput> = Vec::new();
        let mut response = None;
        for (index, request) in plan.steps().iter().enumerate() {
            let step = u32::try_from(index)
                .map_err(|_| RunFault::Replay(format!("step index {} out of range", index)))?;

            let output = match self.history.step(step).completed {
                Some(output) => {
                    tracing::debug!(run_id = %self.run_id, step, "step already completed, skipping");
                    output
                }
                None => {
                    if self.checkpoint().await? == Checkpoint::Cancelled {
                        return Ok(RunOutcome::cancelled(self.run_id.clone()));
                    }
                    match self.execute_step(step, request.clone()).await? {
                        StepResult::Done(output) => output,
                        StepResult::GaveUp(error) => {
                            return Ok(RunOutcome::failed(self.run_id.clone(), error));
                        }
                        StepResult::Cancelled => {
                            return Ok(RunOutcome::cancelled(self.run_id.clone()));
                        }
                    }
                }
            };

            match (request, output) {
                (ActivityRequest::ToolExec(input), ActivityOutput::ToolExec(result)) => {
                    if !result.success && plan.on_tool_failure() == ToolFailurePolicy::Fail {
                        return Ok(RunOutcome::failed(
                            self.run_id.clone(),
                            format!(
                                "tool '{}' reported failure: {}",
                                input.tool_name,
                                result.error.as_deref().unwrap_or("unknown error")
                            ),
                        ));
                    }
                    tool_results.push(result);
                }
                (ActivityRequest::ModelCall(_), ActivityOutput::ModelCall(result)) => {
                    response = Some(result);
                }
                (request, other) => {
                    return Err(RunFault::Replay(format!(
                        "step {} is a {} step but its result is {}",
                        step,
                        request.kind(),
                        other.kind()
                    )));
                }
            }
        }

        if self.checkpoint().await? == Checkpoint::Cancelled {
            return Ok(RunOutcome::cancelled(self.run_id.clone()));
        }

        let response = response
            .ok_or_else(|| RunFault::Replay("plan finished without a model call result".into()))?;
        Ok(RunOutcome::completed(
            self.run_id.clone(),
            RunPlan::render_output(&response, &tool_results),
        ))
    }

    /// Run one step until it succeeds, gives up, or is cancelled during backoff.
    async fn execute_step(
        &mut self,
        step: u32,
        request: ActivityRequest,
    ) -> Result<StepResult, RunFault> {
        let progress = self.history.step(step);
        let policy = *self.start.policies.for_kind(request.kind());
        let timeout = self.start.timeouts.for_request(&request);

        let mut invocation = ActivityInvocation::new(step, request);
        invocation.attempt_count = progress.attempts_recorded();
        invocation.first_attempted_at = progress.first_attempted_at;

        let mut next = if let Some(attempt) = progress.in_flight {
            Next::Redeliver(attempt)
        } else if let Some(delay) = progress.pending_retry {
            Next::Backoff(delay)
        } else if let Some(failure) = progress.last_failure() {
            Next::Decide {
                error: failure.error.clone(),
                at: failure.at,
            }
        } else {
            Next::Attempt
        };

        loop {
            let attempt = match next {
                Next::Attempt => {
                    let scheduled = HistoryEvent::activity_scheduled(
                        step,
                        invocation.attempt_count.saturating_add(1),
                        invocation.request.clone(),
                    );
                    let attempt = invocation.begin_attempt(scheduled.timestamp());
                    self.record(scheduled).await?;
                    attempt
                }
                Next::Redeliver(attempt) => {
                    tracing::info!(
                        run_id = %self.run_id,
                        step,
                        attempt,
                        "redelivering attempt that was in flight before restart"
                    );
                    attempt
                }
                Next::Decide { error, at } => {
                    if self.control.cancel_requested {
                        tracing::info!(run_id = %self.run_id, step, "cancel observed, not retrying");
                        return Ok(StepResult::Cancelled);
                    }
                    let elapsed = invocation.elapsed_since_first_attempt(at);
                    match policy.decide(invocation.attempt_count, elapsed, error.kind()) {
                        RetryDecision::Retry { after } => {
                            let next_attempt = invocation.attempt_count.saturating_add(1);
                            self.record(HistoryEvent::retry_scheduled(step, next_attempt, after))
                                .await?;
                            tracing::warn!(
                                run_id = %self.run_id,
                                step,
                                retry_attempt = next_attempt,
                                retry_in_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
                                "retrying step after retryable error"
                            );
                            next = Next::Backoff(after);
                            continue;
                        }
                        RetryDecision::GiveUp => {
                            tracing::warn!(
                                run_id = %self.run_id,
                                step,
                                attempts = invocation.attempt_count,
                                failure = %error.kind(),
                                "giving up on step"
                            );
                            return Ok(StepResult::GaveUp(format!(
                                "{} (gave up after {} attempt(s))",
                                error, invocation.attempt_count
                            )));
                        }
                    }
                }
                Next::Backoff(delay) => {
                    if !self.sleep_unless_cancelled(delay).await? {
                        tracing::info!(run_id = %self.run_id, step, "backoff interrupted by cancel");
                        return Ok(StepResult::Cancelled);
                    }
                    next = Next::Attempt;
                    continue;
                }
            };

            tracing::info!(
                run_id = %self.run_id,
                step,
                attempt,
                kind = %invocation.kind(),
                "dispatching activity"
            );
            let ctx = ActivityContext::new(self.run_id.clone(), step, attempt)
                .with_cancellation(self.cancellation.child_token());
            let activities = self.activities.clone();
            let dispatch = activities.dispatch(invocation.request.clone(), ctx, timeout);

            match self.await_activity(dispatch).await? {
                Ok(output) => {
                    self.record(HistoryEvent::activity_completed(step, attempt, output.clone()))
                        .await?;
                    tracing::info!(run_id = %self.run_id, step, attempt, "step completed");
                    return Ok(StepResult::Done(output));
                }
                Err(error) => {
                    let failed = HistoryEvent::activity_failed(step, attempt, error.clone());
                    let at = failed.timestamp();
                    self.record(failed).await?;
                    tracing::warn!(
                        run_id = %self.run_id,
                        step,
                        attempt,
                        failure = %error.kind(),
                        message = %truncate_for_log(error.message(), MAX_LOG_TEXT_CHARS),
                        "activity attempt failed"
                    );
                    next = Next::Decide { error, at };
                }
            }
        }
    }

    /// Suspend until the run is not paused. Cancel is observed on every wake.
    async fn checkpoint(&mut self) -> Result<Checkpoint, RunFault> {
        self.drain_inbox().await?;
        loop {
            if self.control.cancel_requested {
                return Ok(Checkpoint::Cancelled);
            }
            if !self.control.paused {
                return Ok(Checkpoint::Proceed);
            }
            if !self.inbox_open {
                return Err(RunFault::Detached);
            }
            tracing::debug!(run_id = %self.run_id, "waiting for resume");
            match self.inbox.recv().await {
                Some(message) => self.handle(message).await?,
                None => self.inbox_open = false,
            }
        }
    }

    /// Wait for an in-flight activity while still applying signals.
    async fn await_activity<F>(&mut self, activity: F) -> Result<F::Output, RunFault>
    where
        F: Future,
    {
        tokio::pin!(activity);
        loop {
            let wake = tokio::select! {
                output = &mut activity => Wake::Ready(output),
                message = self.inbox.recv(), if self.inbox_open => Wake::Message(message),
            };
            match wake {
                Wake::Ready(output) => return Ok(output),
                Wake::Message(Some(message)) => self.handle(message).await?,
                Wake::Message(None) => self.inbox_open = false,
            }
        }
    }

    /// Sleep for `delay`; returns `false` if a cancel arrived first.
    async fn sleep_unless_cancelled(&mut self, delay: Duration) -> Result<bool, RunFault> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            if self.control.cancel_requested {
                return Ok(false);
            }
            let wake = tokio::select! {
                _ = &mut sleep => Wake::Ready(()),
                message = self.inbox.recv(), if self.inbox_open => Wake::Message(message),
            };
            match wake {
                Wake::Ready(()) => return Ok(true),
                Wake::Message(Some(message)) => self.handle(message).await?,
                Wake::Message(None) => self.inbox_open = false,
            }
        }
    }

    async fn drain_inbox(&mut self) -> Result<(), RunFault> {
        while self.inbox_open {
            match self.inbox.try_recv() {
                Ok(message) => self.handle(message).await?,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => self.inbox_open = false,
            }
        }
        Ok(())
    }

    async fn handle(&mut self, message: RunMessage) -> Result<(), RunFault> {
        match message {
            RunMessage::Signal { signal, ack } => {
                let mut next = self.control;
                if next.apply(signal) {
                    self.record(HistoryEvent::signal_received(signal)).await?;
                    self.control = next;
                    if next.cancel_requested {
                        self.cancellation.cancel();
                    }
                    self.publish(None);
                    tracing::info!(
                        run_id = %self.run_id,
                        signal = %signal,
                        paused = next.paused,
                        cancel_requested = next.cancel_requested,
                        "signal applied"
                    );
                } else {
                    tracing::debug!(run_id = %self.run_id, signal = %signal, "signal changed nothing");
                }
                if let Some(ack) = ack {
                    // The sender may have stopped waiting; the signal stands either way.
                    let _ = ack.send(self.control);
                }
            }
        }
        Ok(())
    }

    async fn finish(&mut self, outcome: RunOutcome) -> Option<RunOutcome> {
        if let Err(error) = self
            .record(HistoryEvent::run_finished(outcome.clone()))
            .await
        {
            tracing::error!(
                run_id = %self.run_id,
                error = %error,
                "failed to journal run outcome, leaving run for recovery"
            );
            return None;
        }
        self.transition(outcome.run_status());
        self.publish(Some(outcome.clone()));
        tracing::info!(
            run_id = %self.run_id,
            status = %self.status,
            error = %truncate_for_log(outcome.error.as_deref().unwrap_or(""), MAX_LOG_TEXT_CHARS),
            "run finished"
        );
        Some(outcome)
    }

    fn transition(&mut self, next: RunStatus) {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                run_id = %self.run_id,
                from = %self.status,
                to = %next,
                "unexpected run status transition"
            );
        }
        self.status = next;
    }

    async fn record(&mut self, event: HistoryEvent) -> Result<(), RunFault> {
        self.store.append(&self.run_id, event.clone()).await?;
        self.history.push(event);
        Ok(())
    }

    fn publish(&self, outcome: Option<RunOutcome>) {
        let status = if self.status == RunStatus::Running && self.control.paused {
            RunStatus::Paused
        } else {
            self.status
        };
        let control = self.control;
        self.snapshot.send_modify(|snapshot| {
            snapshot.status = status;
            snapshot.control = control;
            if outcome.is_some() {
                snapshot.outcome = outcome;
            }
        });
    }
}

/// Truncate `text` to at most `max_chars` characters for log output.
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}
