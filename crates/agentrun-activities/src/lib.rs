//! # AgentRun Activities
//!
//! Default activity bodies:
//! - `PlaceholderModelCall`: deterministic stand-in for a model provider
//! - `ToolRegistry`: name-based tool lookup, ships the built-in `echo` tool
//!
//! Both are idempotent, so they satisfy the at-least-once delivery contract
//! without deduplicating on the idempotency key.

mod model;
mod tools;

use std::sync::Arc;

use agentrun_core::activity::Activities;

pub use model::PlaceholderModelCall;
pub use tools::{EchoTool, Tool, ToolRegistry};

/// Placeholder model plus the given tool registry.
pub fn default_activities(tools: ToolRegistry) -> Activities {
    Activities::new(Arc::new(PlaceholderModelCall::new()), Arc::new(tools))
}
