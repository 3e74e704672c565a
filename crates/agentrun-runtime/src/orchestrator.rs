//! Orchestrator host.
//!
//! Owns the registry of live runs keyed by run id. Each run is a spawned
//! [`RunWorkflow`] task watched by a supervisor task; callers talk to a run
//! only through its inbox and read it only through its published snapshot.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};

use agentrun_config::AgentRunConfig;
use agentrun_core::activity::{Activities, ActivityTimeouts};
use agentrun_core::history::{HistoryEvent, RunHistory};
use agentrun_core::retry::RetryPolicies;
use agentrun_core::store::{HistoryStore, StoreError};
use agentrun_core::types::{
    RunConfig, RunControlState, RunId, RunIdentity, RunInput, RunOutcome, RunSignal, RunSnapshot,
};
use agentrun_core::workflow::{RunMessage, RunWorkflow};

use crate::error::RuntimeError;
use crate::reporter::OutcomeReporter;

/// Host settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub task_queue: String,
    /// Snapshotted into every new run's journal.
    pub policies: RetryPolicies,
    pub timeouts: ActivityTimeouts,
    pub signal_buffer: usize,
    pub max_finished_runs: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_queue: "agent-runtime".to_string(),
            policies: RetryPolicies::default(),
            timeouts: ActivityTimeouts::default(),
            signal_buffer: 64,
            max_finished_runs: 1_000,
        }
    }
}

impl From<&AgentRunConfig> for OrchestratorConfig {
    fn from(config: &AgentRunConfig) -> Self {
        Self {
            task_queue: config.worker.task_queue.clone(),
            policies: config.retry_policies(),
            timeouts: config.activity_timeouts(),
            signal_buffer: config.worker.signal_buffer,
            max_finished_runs: config.worker.max_finished_runs,
        }
    }
}

/// What `start_run` did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDisposition {
    Started,
    /// A run with this id already exists; nothing new was started.
    AlreadyStarted,
}

struct RunEntry {
    identity: RunIdentity,
    inbox: mpsc::Sender<RunMessage>,
    snapshot: Arc<watch::Sender<RunSnapshot>>,
    task: AbortHandle,
}

struct Inner {
    config: OrchestratorConfig,
    store: Arc<dyn HistoryStore>,
    activities: Activities,
    reporter: Arc<dyn OutcomeReporter>,
    runs: RwLock<HashMap<RunId, RunEntry>>,
    finished: Mutex<VecDeque<RunId>>,
    closed: AtomicBool,
}

/// Hosts run state machines. Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn HistoryStore>,
        activities: Activities,
        reporter: Arc<dyn OutcomeReporter>,
    ) -> Result<Self, RuntimeError> {
        config.policies.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                activities,
                reporter,
                runs: RwLock::new(HashMap::new()),
                finished: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn store(&self) -> Arc<dyn HistoryStore> {
        self.inner.store.clone()
    }

    /// Number of runs currently held in the registry, finished ones included.
    pub fn registered_runs(&self) -> usize {
        self.inner.read_runs().map(|runs| runs.len()).unwrap_or(0)
    }

    /// Start a run. Idempotent per run id; the same id under a different
    /// identity is a conflict.
    pub async fn start_run(
        &self,
        identity: RunIdentity,
        config: RunConfig,
        input: RunInput,
    ) -> Result<StartDisposition, RuntimeError> {
        let run_id = identity.run_id.clone();
        if run_id.is_blank() {
            return Err(RuntimeError::InvalidRunId(run_id.to_string()));
        }
        self.inner.ensure_open()?;
        let registered = self
            .inner
            .read_runs()?
            .get(&run_id)
            .map(|entry| entry.identity.clone());
        if let Some(existing) = registered {
            tracing::debug!(run_id = %run_id, "duplicate start request");
            return check_identity(&existing, &identity);
        }
        let requested = identity.clone();

        let first = HistoryEvent::run_started(
            identity,
            config,
            input,
            self.inner.config.policies,
            self.inner.config.timeouts,
        );
        match self.inner.store.create(&run_id, first.clone()).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => {
                // Known to the store but not running here: an unfinished
                // journal is picked up, a finished one is left alone.
                let history = self
                    .inner
                    .load_history(&run_id)
                    .await?
                    .ok_or_else(|| RuntimeError::RunNotFound(run_id.clone()))?;
                if let Some(start) = history.start() {
                    check_identity(&start.identity, &requested)?;
                }
                if !history.is_finished() {
                    self.inner.launch(&run_id, history)?;
                }
                return Ok(StartDisposition::AlreadyStarted);
            }
            Err(StoreError::InvalidId(message)) => return Err(RuntimeError::InvalidRunId(message)),
            Err(e) => return Err(e.into()),
        }

        if self.inner.launch(&run_id, RunHistory::new(vec![first]))? {
            tracing::info!(
                run_id = %run_id,
                task_queue = %self.inner.config.task_queue,
                "run accepted"
            );
        }
        Ok(StartDisposition::Started)
    }

    /// Deliver a signal and wait until the run has recorded it.
    ///
    /// Signals to a run that is already terminal are no-ops and answer with
    /// the run's final control state.
    pub async fn signal(
        &self,
        run_id: &RunId,
        signal: RunSignal,
    ) -> Result<RunControlState, RuntimeError> {
        let (inbox, snapshot) = match self.inner.entry_channels(run_id)? {
            Some(channels) => channels,
            None => {
                let history = self
                    .inner
                    .load_history(run_id)
                    .await?
                    .ok_or_else(|| RuntimeError::RunNotFound(run_id.clone()))?;
                if history.is_finished() {
                    return Ok(history.control_state());
                }
                // Journal exists but nobody is driving it yet.
                self.inner.ensure_open()?;
                self.inner.launch(run_id, history)?;
                self.inner
                    .entry_channels(run_id)?
                    .ok_or_else(|| RuntimeError::RunNotFound(run_id.clone()))?
            }
        };

        if snapshot.borrow().is_terminal() {
            return Ok(snapshot.borrow().control);
        }

        let (message, ack) = RunMessage::signal(signal);
        if inbox.send(message).await.is_err() {
            return Ok(snapshot.borrow().control);
        }
        match ack.await {
            Ok(control) => {
                tracing::debug!(run_id = %run_id, signal = %signal, "signal acknowledged");
                Ok(control)
            }
            Err(_) if snapshot.borrow().is_terminal() => Ok(snapshot.borrow().control),
            Err(_) => Err(RuntimeError::SignalNotAcknowledged(run_id.clone())),
        }
    }

    /// Side-effect-free read of the paused flag.
    pub fn query_paused(&self, run_id: &RunId) -> Result<bool, RuntimeError> {
        Ok(self.snapshot(run_id)?.is_paused())
    }

    pub fn snapshot(&self, run_id: &RunId) -> Result<RunSnapshot, RuntimeError> {
        let runs = self.inner.read_runs()?;
        let entry = runs
            .get(run_id)
            .ok_or_else(|| RuntimeError::RunNotFound(run_id.clone()))?;
        let snapshot = entry.snapshot.borrow().clone();
        Ok(snapshot)
    }

    /// Like [`Orchestrator::snapshot`], but evicted runs are rebuilt from
    /// their journal.
    pub async fn describe(&self, run_id: &RunId) -> Result<RunSnapshot, RuntimeError> {
        match self.snapshot(run_id) {
            Err(RuntimeError::RunNotFound(_)) => {}
            other => return other,
        }
        let history = self
            .inner
            .load_history(run_id)
            .await?
            .ok_or_else(|| RuntimeError::RunNotFound(run_id.clone()))?;
        let outcome = history
            .outcome()
            .cloned()
            .ok_or_else(|| RuntimeError::RunNotFound(run_id.clone()))?;
        Ok(RunSnapshot {
            status: outcome.run_status(),
            control: history.control_state(),
            outcome: Some(outcome),
        })
    }

    /// Subscribe to a registered run's snapshots.
    pub fn watch(&self, run_id: &RunId) -> Result<watch::Receiver<RunSnapshot>, RuntimeError> {
        let runs = self.inner.read_runs()?;
        runs.get(run_id)
            .map(|entry| entry.snapshot.subscribe())
            .ok_or_else(|| RuntimeError::RunNotFound(run_id.clone()))
    }

    /// The run's outcome, or `None` while it is still running.
    ///
    /// Evicted runs are answered from their journal.
    pub async fn get_outcome(&self, run_id: &RunId) -> Result<Option<RunOutcome>, RuntimeError> {
        if let Some((_, snapshot)) = self.inner.entry_channels(run_id)? {
            let outcome = snapshot.borrow().outcome.clone();
            return Ok(outcome);
        }
        let history = self
            .inner
            .load_history(run_id)
            .await?
            .ok_or_else(|| RuntimeError::RunNotFound(run_id.clone()))?;
        Ok(history.outcome().cloned())
    }

    /// Wait until a registered run reaches a terminal state.
    pub async fn wait_for_outcome(&self, run_id: &RunId) -> Result<RunOutcome, RuntimeError> {
        let mut rx = self.watch(run_id)?;
        let waited = rx
            .wait_for(|snapshot| snapshot.outcome.is_some())
            .await
            .ok()
            .and_then(|snapshot| snapshot.outcome.clone());
        match waited {
            Some(outcome) => Ok(outcome),
            None => self
                .get_outcome(run_id)
                .await?
                .ok_or_else(|| RuntimeError::RunNotFound(run_id.clone())),
        }
    }

    /// Resume every unfinished journal in the store. Returns how many runs
    /// were resumed.
    pub async fn recover(&self) -> Result<usize, RuntimeError> {
        self.inner.ensure_open()?;
        let mut resumed = 0;
        for run_id in self.inner.store.list_runs().await? {
            if self.inner.read_runs()?.contains_key(&run_id) {
                continue;
            }
            let history = match self.inner.load_history(&run_id).await {
                Ok(Some(history)) => history,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "failed to load journal");
                    continue;
                }
            };
            if history.is_finished() {
                continue;
            }
            match self.inner.launch(&run_id, history) {
                Ok(true) => {
                    resumed += 1;
                    tracing::info!(run_id = %run_id, "run recovered");
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "failed to recover run");
                }
            }
        }
        tracing::info!(resumed, "recovery finished");
        Ok(resumed)
    }

    /// Detach every live run without recording outcomes.
    ///
    /// Unfinished journals stay in the store for a later `recover`.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let drained: Vec<(RunId, RunEntry)> = match self.inner.runs.write() {
            Ok(mut runs) => runs.drain().collect(),
            Err(poisoned) => poisoned.into_inner().drain().collect(),
        };
        for (run_id, entry) in &drained {
            if !entry.snapshot.borrow().is_terminal() {
                tracing::info!(run_id = %run_id, "detaching run");
            }
            entry.task.abort();
        }
        tracing::info!(runs = drained.len(), "orchestrator shut down");
    }
}

impl Inner {
    fn ensure_open(&self) -> Result<(), RuntimeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::ShutDown);
        }
        Ok(())
    }

    fn read_runs(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<RunId, RunEntry>>, RuntimeError> {
        self.runs
            .read()
            .map_err(|_| StoreError::Internal("run registry lock poisoned".to_string()).into())
    }

    #[allow(clippy::type_complexity)]
    fn entry_channels(
        &self,
        run_id: &RunId,
    ) -> Result<Option<(mpsc::Sender<RunMessage>, Arc<watch::Sender<RunSnapshot>>)>, RuntimeError>
    {
        Ok(self
            .read_runs()?
            .get(run_id)
            .map(|entry| (entry.inbox.clone(), entry.snapshot.clone())))
    }

    async fn load_history(&self, run_id: &RunId) -> Result<Option<RunHistory>, RuntimeError> {
        match self.store.load(run_id).await {
            Ok(events) => Ok(events.map(RunHistory::new)),
            Err(StoreError::InvalidId(message)) => Err(RuntimeError::InvalidRunId(message)),
            Err(e) => Err(e.into()),
        }
    }

    /// Spawn the state machine for `history` unless the run is already
    /// registered. Returns whether a task was spawned.
    fn launch(self: &Arc<Self>, run_id: &RunId, history: RunHistory) -> Result<bool, RuntimeError> {
        let identity = history
            .start()
            .map(|start| start.identity)
            .ok_or_else(|| RuntimeError::Replay {
                run_id: run_id.clone(),
                message: "journal does not open with run_started".to_string(),
            })?;
        let mut runs = self
            .runs
            .write()
            .map_err(|_| StoreError::Internal("run registry lock poisoned".to_string()))?;
        if runs.contains_key(&run_id) {
            return Ok(false);
        }

        let (tx, rx) = mpsc::channel(self.config.signal_buffer.max(1));
        let (snapshot, _) = watch::channel(RunSnapshot::created(history.control_state()));
        let snapshot = Arc::new(snapshot);
        let workflow = RunWorkflow::from_history(
            history,
            self.store.clone(),
            self.activities.clone(),
            rx,
            snapshot.clone(),
        )
        .map_err(|e| RuntimeError::Replay {
            run_id: run_id.clone(),
            message: e.to_string(),
        })?;
        if workflow.run_id() != run_id {
            return Err(RuntimeError::Replay {
                run_id: run_id.clone(),
                message: format!("journal belongs to run {}", workflow.run_id()),
            });
        }

        let task = tokio::spawn(workflow.run());
        runs.insert(
            run_id.clone(),
            RunEntry {
                identity,
                inbox: tx,
                snapshot: snapshot.clone(),
                task: task.abort_handle(),
            },
        );
        drop(runs);

        tokio::spawn(supervise(self.clone(), run_id.clone(), snapshot, task));
        Ok(true)
    }

    /// Remove a run that stopped without a journaled outcome, unless the id
    /// has already been relaunched.
    fn unregister(&self, run_id: &RunId, snapshot: &Arc<watch::Sender<RunSnapshot>>) {
        if let Ok(mut runs) = self.runs.write() {
            let same_task = runs
                .get(run_id)
                .is_some_and(|entry| Arc::ptr_eq(&entry.snapshot, snapshot));
            if same_task {
                runs.remove(run_id);
                tracing::info!(run_id = %run_id, "run unregistered, journal left open");
            }
        }
    }

    /// Mark a run finished and evict the oldest finished runs over the limit.
    fn retire(&self, run_id: &RunId) {
        let evicted: Vec<RunId> = {
            let mut finished = match self.finished.lock() {
                Ok(finished) => finished,
                Err(poisoned) => poisoned.into_inner(),
            };
            finished.push_back(run_id.clone());
            let excess = finished.len().saturating_sub(self.config.max_finished_runs);
            finished.drain(..excess).collect()
        };
        if evicted.is_empty() {
            return;
        }
        if let Ok(mut runs) = self.runs.write() {
            for id in &evicted {
                runs.remove(id);
                tracing::debug!(run_id = %id, "evicted finished run");
            }
        }
    }
}

fn check_identity(
    existing: &RunIdentity,
    requested: &RunIdentity,
) -> Result<StartDisposition, RuntimeError> {
    if existing != requested {
        return Err(RuntimeError::IdentityConflict(requested.run_id.clone()));
    }
    Ok(StartDisposition::AlreadyStarted)
}

/// Wait for a run task and hand its outcome to the reporter.
///
/// Only outcomes that reached the journal are reported; anything else is
/// unregistered so the journal can be driven again.
async fn supervise(
    inner: Arc<Inner>,
    run_id: RunId,
    snapshot: Arc<watch::Sender<RunSnapshot>>,
    task: JoinHandle<Option<RunOutcome>>,
) {
    let outcome = match task.await {
        Ok(Some(outcome)) => outcome,
        Ok(None) => {
            inner.unregister(&run_id, &snapshot);
            return;
        }
        Err(e) if e.is_cancelled() => return,
        Err(e) => {
            let message = panic_message(e.into_panic());
            tracing::error!(run_id = %run_id, error = %message, "orchestration fault: run task panicked");
            let outcome =
                RunOutcome::failed(run_id.clone(), format!("orchestration fault: {}", message));
            if let Err(e) = inner
                .store
                .append(&run_id, HistoryEvent::run_finished(outcome.clone()))
                .await
            {
                tracing::error!(
                    run_id = %run_id,
                    error = %e,
                    "failed to journal run outcome, leaving run for recovery"
                );
                inner.unregister(&run_id, &snapshot);
                return;
            }
            snapshot.send_modify(|current| {
                current.status = outcome.run_status();
                current.outcome = Some(outcome.clone());
            });
            outcome
        }
    };

    inner.reporter.report(outcome).await;
    inner.retire(&run_id);
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "run task panicked".to_string()
}
