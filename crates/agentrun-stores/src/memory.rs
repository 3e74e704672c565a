//! HistoryStore in-memory implementation.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use agentrun_core::history::HistoryEvent;
use agentrun_core::store::{HistoryStore, StoreError};
use agentrun_core::types::RunId;

/// In-memory journals for development and testing.
///
/// Survives a host being dropped and rebuilt over the same `Arc`, which is
/// enough to exercise recovery in tests; nothing survives the process.
pub struct InMemoryHistoryStore {
    journals: RwLock<HashMap<RunId, Vec<HistoryEvent>>>,
    order: RwLock<VecDeque<RunId>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            journals: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn create(&self, run_id: &RunId, first: HistoryEvent) -> Result<(), StoreError> {
        let mut journals = self
            .journals
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        if journals.contains_key(run_id) {
            return Err(StoreError::AlreadyExists(run_id.to_string()));
        }
        let mut order = self
            .order
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        journals.insert(run_id.clone(), vec![first]);
        order.push_back(run_id.clone());
        Ok(())
    }

    async fn append(&self, run_id: &RunId, event: HistoryEvent) -> Result<(), StoreError> {
        let mut journals = self
            .journals
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        journals
            .get_mut(run_id)
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?
            .push(event);
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<Vec<HistoryEvent>>, StoreError> {
        let journals = self
            .journals
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(journals.get(run_id).cloned())
    }

    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError> {
        let order = self
            .order
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(order.iter().cloned().collect())
    }

    async fn delete(&self, run_id: &RunId) -> Result<bool, StoreError> {
        let mut journals = self
            .journals
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let removed = journals.remove(run_id).is_some();
        if removed {
            let mut order = self
                .order
                .write()
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            order.retain(|id| id != run_id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_core::activity::ActivityTimeouts;
    use agentrun_core::retry::RetryPolicies;
    use agentrun_core::types::{RunConfig, RunIdentity, RunInput, RunSignal};

    fn started(run_id: &str) -> HistoryEvent {
        HistoryEvent::run_started(
            RunIdentity::new(run_id, "tenant", "agent", "v1"),
            RunConfig::new(),
            RunInput::new(),
            RetryPolicies::default(),
            ActivityTimeouts::default(),
        )
    }

    #[test]
    fn test_create_is_exclusive_and_append_keeps_order() {
        tokio_test::block_on(async {
            let store = InMemoryHistoryStore::new();
            let id = RunId::from("run-a");
            store.create(&id, started("run-a")).await.unwrap();
            assert!(matches!(
                store.create(&id, started("run-a")).await,
                Err(StoreError::AlreadyExists(_))
            ));

            store
                .append(&id, HistoryEvent::signal_received(RunSignal::Pause))
                .await
                .unwrap();
            let events = store.load(&id).await.unwrap().unwrap();
            assert_eq!(events.len(), 2);
            assert_eq!(events[1].name(), "signal_received");
        });
    }

    #[test]
    fn test_append_to_unknown_run_fails() {
        tokio_test::block_on(async {
            let store = InMemoryHistoryStore::new();
            let result = store
                .append(
                    &RunId::from("ghost"),
                    HistoryEvent::signal_received(RunSignal::Cancel),
                )
                .await;
            assert!(matches!(result, Err(StoreError::NotFound(_))));
            assert!(store.load(&RunId::from("ghost")).await.unwrap().is_none());
        });
    }

    #[test]
    fn test_list_and_delete() {
        tokio_test::block_on(async {
            let store = InMemoryHistoryStore::new();
            for id in ["run-1", "run-2", "run-3"] {
                store.create(&RunId::from(id), started(id)).await.unwrap();
            }
            assert!(store.delete(&RunId::from("run-2")).await.unwrap());
            assert!(!store.delete(&RunId::from("run-2")).await.unwrap());
            assert_eq!(
                store.list_runs().await.unwrap(),
                vec![RunId::from("run-1"), RunId::from("run-3")]
            );
        });
    }
}
