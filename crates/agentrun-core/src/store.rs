//! HistoryStore - durable journal of run progress
//!
//! The store is the persistence half of the durable-execution substrate:
//! one append-only journal per run. Implementations live in the
//! `agentrun-stores` crate.

use async_trait::async_trait;
use thiserror::Error;

use crate::history::HistoryEvent;
use crate::types::RunId;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        StoreError::Io(value.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Serialization(value.to_string())
    }
}

/// Append-only, per-run journal.
///
/// Entries of one run are returned by `load` in the order they were appended.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Start a new journal with its first entry.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the run already has one;
    /// this is what keeps at most one instance per run id.
    async fn create(&self, run_id: &RunId, first: HistoryEvent) -> Result<(), StoreError>;

    /// Append an entry to an existing journal.
    async fn append(&self, run_id: &RunId, event: HistoryEvent) -> Result<(), StoreError>;

    /// Full journal of a run, if it exists.
    async fn load(&self, run_id: &RunId) -> Result<Option<Vec<HistoryEvent>>, StoreError>;

    /// Ids of every run with a journal.
    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError>;

    /// Drop a journal; returns whether one existed.
    async fn delete(&self, run_id: &RunId) -> Result<bool, StoreError>;
}
