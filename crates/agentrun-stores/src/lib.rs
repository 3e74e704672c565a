//! # AgentRun Stores
//!
//! Journal backends for agentrun.
//!
//! This crate provides:
//! - InMemory HistoryStore
//! - File-backed (JSON lines) HistoryStore

mod file;
mod memory;

pub use file::FileHistoryStore;
pub use memory::InMemoryHistoryStore;

// Re-export core traits for convenience
pub use agentrun_core::store::{HistoryStore, StoreError};
