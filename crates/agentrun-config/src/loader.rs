//! Configuration loading and validation.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::{AgentRunConfig, RetryPolicyConfig};

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load the full configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<AgentRunConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<AgentRunConfig, ConfigError> {
    // An empty document deserializes as null, not as an empty mapping.
    if content.trim().is_empty() {
        return Ok(AgentRunConfig::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

pub fn validate_config(config: &AgentRunConfig) -> Result<(), ConfigError> {
    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    if config.worker.task_queue.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "worker.task_queue must not be empty".to_string(),
        ));
    }

    if config.worker.signal_buffer == 0 {
        return Err(ConfigError::Invalid(
            "worker.signal_buffer must be > 0".to_string(),
        ));
    }

    validate_retry("retry.model_call", &config.retry.model_call)?;
    validate_retry("retry.tool_exec", &config.retry.tool_exec)?;

    if config.timeouts.model_call_secs == 0 {
        return Err(ConfigError::Invalid(
            "timeouts.model_call_secs must be > 0".to_string(),
        ));
    }

    match config.store.backend.as_str() {
        "in_memory" => {}
        "file" => {
            let has_path = config
                .store
                .path
                .as_deref()
                .is_some_and(|path| !path.trim().is_empty());
            if !has_path {
                return Err(ConfigError::Invalid(
                    "store.path is required when store.backend is 'file'".to_string(),
                ));
            }
        }
        other => {
            return Err(ConfigError::Invalid(format!(
                "store.backend '{}' is not supported (expected in_memory or file)",
                other
            )));
        }
    }

    if config.server.listen.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "server.listen must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry(key: &str, policy: &RetryPolicyConfig) -> Result<(), ConfigError> {
    policy.to_policy()
        .validate()
        .map_err(|e| ConfigError::Invalid(format!("{}: {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.worker.task_queue, "agent-runtime");
        assert_eq!(config.store.backend, "in_memory");
        let policies = config.retry_policies();
        assert_eq!(policies.model_call.max_attempts, 3);
        assert_eq!(policies.model_call.initial_interval, Duration::from_secs(1));
        assert_eq!(policies.tool_exec.maximum_interval, Duration::from_secs(100));
        let timeouts = config.activity_timeouts();
        assert_eq!(timeouts.model_call, Duration::from_secs(300));
        assert_eq!(timeouts.tool_exec_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_sections_override_defaults() {
        let file = write_config(
            r#"
worker:
  max_finished_runs: 10
retry:
  tool_exec:
    max_attempts: 5
    initial_interval_ms: 200
    maximum_elapsed_ms: 60000
store:
  backend: file
  path: /var/lib/agentrun/journals
observability:
  log_level: debug
"#,
        );
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.worker.max_finished_runs, 10);
        assert_eq!(config.worker.signal_buffer, 64);
        let tool_exec = config.retry_policies().tool_exec;
        assert_eq!(tool_exec.max_attempts, 5);
        assert_eq!(tool_exec.initial_interval, Duration::from_millis(200));
        assert_eq!(tool_exec.maximum_elapsed, Some(Duration::from_secs(60)));
        assert_eq!(config.retry_policies().model_call.max_attempts, 3);
        assert_eq!(config.store.path.as_deref(), Some("/var/lib/agentrun/journals"));
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_invalid_values_name_the_key() {
        let cases = [
            ("retry:\n  model_call:\n    max_attempts: 0\n", "retry.model_call"),
            ("retry:\n  tool_exec:\n    backoff_coefficient: 0.5\n", "retry.tool_exec"),
            ("store:\n  backend: file\n", "store.path"),
            ("store:\n  backend: redis\n", "store.backend"),
            ("worker:\n  signal_buffer: 0\n", "worker.signal_buffer"),
        ];
        for (yaml, key) in cases {
            let file = write_config(yaml);
            match load_config(file.path()) {
                Err(ConfigError::Invalid(message)) => {
                    assert!(message.contains(key), "{} should mention {}", message, key)
                }
                other => panic!("expected invalid config for {:?}, got {:?}", yaml, other),
            }
        }
    }

    #[test]
    fn test_malformed_yaml_is_a_parse_error() {
        let file = write_config("worker: [unclosed");
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }
}
