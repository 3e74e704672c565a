//! # AgentRun Runtime
//!
//! Hosts run state machines:
//! - `Orchestrator`: starts at most one run per run id, routes signals and
//!   queries, supervises run tasks, recovers unfinished journals
//! - `OutcomeReporter`: hands terminal outcomes to the control plane
//! - `RuntimeApp`: builds the whole host from one `agentrun.yaml`

pub mod bootstrap;
mod error;
mod orchestrator;
mod reporter;

pub use bootstrap::{init_tracing_if_needed, BootstrapError, RuntimeApp};
pub use error::RuntimeError;
pub use orchestrator::{Orchestrator, OrchestratorConfig, StartDisposition};
pub use reporter::{BroadcastOutcomeReporter, OutcomeReporter};
