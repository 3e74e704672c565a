//! Activity failure taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of an activity failure, as seen by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rate limit, timeout, connection reset.
    TransientUpstream,
    /// Malformed prompt or unknown model.
    InvalidRequest,
    /// Tool lookup or sandbox infrastructure unavailable.
    ToolInfrastructure,
    /// No tool registered under the requested name.
    ToolNotFound,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::TransientUpstream | FailureKind::ToolInfrastructure
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::TransientUpstream => "transient_upstream",
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::ToolInfrastructure => "tool_infrastructure",
            FailureKind::ToolNotFound => "tool_not_found",
        };
        f.write_str(label)
    }
}

/// Exceptional failure of an activity invocation.
///
/// A tool that runs but reports `success = false` is *not* an `ActivityError`;
/// that result is passed through to the run as a normal step output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ActivityError {
    #[error("transient upstream error: {0}")]
    TransientUpstream(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("tool infrastructure error: {0}")]
    ToolInfrastructure(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
}

impl ActivityError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientUpstream(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ActivityError::TransientUpstream(_) => FailureKind::TransientUpstream,
            ActivityError::InvalidRequest(_) => FailureKind::InvalidRequest,
            ActivityError::ToolInfrastructure(_) => FailureKind::ToolInfrastructure,
            ActivityError::ToolNotFound(_) => FailureKind::ToolNotFound,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn message(&self) -> &str {
        match self {
            ActivityError::TransientUpstream(message)
            | ActivityError::InvalidRequest(message)
            | ActivityError::ToolInfrastructure(message)
            | ActivityError::ToolNotFound(message) => message,
        }
    }
}
