//! Run identity and the read-only payloads supplied at run creation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Strongly-typed Run ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&RunId> for RunId {
    fn from(value: &RunId) -> Self {
        value.clone()
    }
}

impl From<RunId> for String {
    fn from(value: RunId) -> Self {
        value.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<&str> for RunId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Immutable identity of a run, assigned once at creation.
///
/// Every journal entry and activity invocation of the run is correlated
/// through `run_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    pub run_id: RunId,
    pub tenant_id: String,
    pub agent_id: String,
    pub agent_version_id: String,
}

impl RunIdentity {
    pub fn new(
        run_id: impl Into<RunId>,
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        agent_version_id: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            agent_version_id: agent_version_id.into(),
        }
    }
}

/// Run configuration (model selection, generation parameters, pipeline policy).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunConfig(pub Map<String, Value>);

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Builder-style insert, mostly for tests and callers assembling config by hand.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }
}

impl From<Map<String, Value>> for RunConfig {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

/// Task payload of a run (e.g. the prompt).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunInput(pub Map<String, Value>);

impl RunInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }
}

impl From<Map<String, Value>> for RunInput {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}
