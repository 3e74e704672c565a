//! OutcomeReporter - hands terminal run outcomes to the control plane.

use async_trait::async_trait;
use tokio::sync::broadcast;

use agentrun_core::types::RunOutcome;

/// Receives each run's outcome once, when the run reaches a terminal state.
///
/// The journal stays the record of truth; a reporter that drops an outcome
/// loses nothing that `get_outcome` cannot answer later.
#[async_trait]
pub trait OutcomeReporter: Send + Sync {
    async fn report(&self, outcome: RunOutcome);
}

/// In-process reporter based on a tokio broadcast channel.
pub struct BroadcastOutcomeReporter {
    tx: broadcast::Sender<RunOutcome>,
}

impl BroadcastOutcomeReporter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunOutcome> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastOutcomeReporter {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl OutcomeReporter for BroadcastOutcomeReporter {
    async fn report(&self, outcome: RunOutcome) {
        // No subscribers is not an error.
        let _ = self.tx.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broadcast_reporter_delivers_outcome() {
        tokio_test::block_on(async {
            let reporter = BroadcastOutcomeReporter::new(4);
            let mut rx = reporter.subscribe();

            reporter
                .report(RunOutcome::completed("run-1", json!({"response": "hi"})))
                .await;

            let outcome = rx.recv().await.unwrap();
            assert_eq!(outcome.run_id, "run-1");
            assert_eq!(outcome.output, Some(json!({"response": "hi"})));
        });
    }

    #[test]
    fn test_report_without_subscribers_is_ok() {
        tokio_test::block_on(async {
            let reporter = BroadcastOutcomeReporter::default();
            reporter.report(RunOutcome::cancelled("run-2")).await;
        });
    }
}
