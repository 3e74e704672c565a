//! # AgentRun Config
//!
//! Single-file configuration for agentrun.
//! One `agentrun.yaml` configures the worker, retry policies, activity
//! timeouts, the journal store, the HTTP listener and observability.

mod loader;

pub use loader::{load_config, validate_config, ConfigError};

use serde::Deserialize;
use std::time::Duration;

use agentrun_core::activity::{ActivityTimeouts, DEFAULT_MODEL_CALL_TIMEOUT, DEFAULT_TOOL_EXEC_GRACE};
use agentrun_core::retry::{
    RetryPolicies, RetryPolicy, DEFAULT_BACKOFF_COEFFICIENT, DEFAULT_INITIAL_INTERVAL,
    DEFAULT_MAXIMUM_INTERVAL, DEFAULT_MAX_ATTEMPTS,
};

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentRunConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AgentRunConfig {
    pub fn retry_policies(&self) -> RetryPolicies {
        RetryPolicies {
            model_call: self.retry.model_call.to_policy(),
            tool_exec: self.retry.tool_exec.to_policy(),
        }
    }

    pub fn activity_timeouts(&self) -> ActivityTimeouts {
        ActivityTimeouts {
            model_call: Duration::from_secs(self.timeouts.model_call_secs),
            tool_exec_grace: Duration::from_secs(self.timeouts.tool_exec_grace_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
        }
    }
}

fn default_app_name() -> String {
    "agentrun".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Name of the work queue this host serves.
    #[serde(default = "default_task_queue")]
    pub task_queue: String,
    /// Capacity of each run's signal inbox.
    #[serde(default = "default_signal_buffer")]
    pub signal_buffer: usize,
    /// Finished runs kept queryable before the oldest are evicted.
    #[serde(default = "default_max_finished_runs")]
    pub max_finished_runs: usize,
    /// Resume unfinished journals at startup.
    #[serde(default = "default_true")]
    pub recover_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            task_queue: default_task_queue(),
            signal_buffer: default_signal_buffer(),
            max_finished_runs: default_max_finished_runs(),
            recover_on_start: true,
        }
    }
}

fn default_task_queue() -> String {
    "agent-runtime".to_string()
}

fn default_signal_buffer() -> usize {
    64
}

fn default_max_finished_runs() -> usize {
    1_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub model_call: RetryPolicyConfig,
    #[serde(default)]
    pub tool_exec: RetryPolicyConfig,
}

/// Retry policy as written in the config file (millisecond intervals).
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicyConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,
    #[serde(default = "default_maximum_interval_ms")]
    pub maximum_interval_ms: u64,
    #[serde(default)]
    pub maximum_elapsed_ms: Option<u64>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            backoff_coefficient: default_backoff_coefficient(),
            maximum_interval_ms: default_maximum_interval_ms(),
            maximum_elapsed_ms: None,
        }
    }
}

impl RetryPolicyConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            backoff_coefficient: self.backoff_coefficient,
            maximum_interval: Duration::from_millis(self.maximum_interval_ms),
            maximum_elapsed: self.maximum_elapsed_ms.map(Duration::from_millis),
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_initial_interval_ms() -> u64 {
    DEFAULT_INITIAL_INTERVAL.as_millis() as u64
}

fn default_backoff_coefficient() -> f64 {
    DEFAULT_BACKOFF_COEFFICIENT
}

fn default_maximum_interval_ms() -> u64 {
    DEFAULT_MAXIMUM_INTERVAL.as_millis() as u64
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_model_call_secs")]
    pub model_call_secs: u64,
    #[serde(default = "default_tool_exec_grace_secs")]
    pub tool_exec_grace_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            model_call_secs: default_model_call_secs(),
            tool_exec_grace_secs: default_tool_exec_grace_secs(),
        }
    }
}

fn default_model_call_secs() -> u64 {
    DEFAULT_MODEL_CALL_TIMEOUT.as_secs()
}

fn default_tool_exec_grace_secs() -> u64 {
    DEFAULT_TOOL_EXEC_GRACE.as_secs()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// `in_memory` or `file`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Journal directory for the `file` backend.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

fn default_backend() -> String {
    "in_memory".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
