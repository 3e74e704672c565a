//! Core type definitions for agentrun
//!
//! - RunIdentity / RunConfig / RunInput: immutable inputs of a run
//! - RunControlState / RunSignal: signal-driven control flags
//! - RunStatus / RunSnapshot: lifecycle and query view
//! - RunOutcome: terminal record

mod control;
mod outcome;
mod run;

pub use control::{RunControlState, RunSignal, RunSnapshot, RunStatus, UnknownSignal};
pub use outcome::{OutcomeStatus, RunOutcome};
pub use run::{RunConfig, RunId, RunIdentity, RunInput};
