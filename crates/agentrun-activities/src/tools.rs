//! Tool registry and built-in tools.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use agentrun_core::activity::{
    ActivityContext, ActivityError, ToolExecActivity, ToolExecInput, ToolExecOutput,
};

/// A named tool that can be executed by a run.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name (must be unique)
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Execute the tool.
    ///
    /// Return `Ok` with `success = false` for failures the tool itself
    /// detected; reserve `Err` for infrastructure problems.
    async fn run(
        &self,
        input: Map<String, Value>,
        ctx: &ActivityContext,
    ) -> Result<ToolExecOutput, ActivityError>;
}

/// Tool registry, and the default tool-execution activity body.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry with the built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoTool));
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[async_trait]
impl ToolExecActivity for ToolRegistry {
    async fn execute(
        &self,
        input: ToolExecInput,
        ctx: ActivityContext,
    ) -> Result<ToolExecOutput, ActivityError> {
        let tool = self
            .get(&input.tool_name)
            .ok_or_else(|| ActivityError::ToolNotFound(input.tool_name.clone()))?;
        tracing::info!(
            run_id = %ctx.run_id,
            step = ctx.step,
            attempt = ctx.attempt,
            tool = %input.tool_name,
            "executing tool"
        );
        let output = tool.run(input.tool_input, &ctx).await?;
        if !output.success {
            tracing::info!(
                run_id = %ctx.run_id,
                tool = %input.tool_name,
                error = output.error.as_deref().unwrap_or(""),
                "tool reported failure"
            );
        }
        Ok(output)
    }
}

/// Returns its input unchanged.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the tool input as the result"
    }

    async fn run(
        &self,
        input: Map<String, Value>,
        _ctx: &ActivityContext,
    ) -> Result<ToolExecOutput, ActivityError> {
        Ok(ToolExecOutput::ok(Value::Object(input)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SandboxDown;

    #[async_trait]
    impl Tool for SandboxDown {
        fn name(&self) -> &str {
            "shell"
        }

        fn description(&self) -> &str {
            "always fails to start"
        }

        async fn run(
            &self,
            _input: Map<String, Value>,
            _ctx: &ActivityContext,
        ) -> Result<ToolExecOutput, ActivityError> {
            Err(ActivityError::ToolInfrastructure(
                "sandbox unavailable".to_string(),
            ))
        }
    }

    fn input(name: &str, payload: Value) -> ToolExecInput {
        let Value::Object(map) = payload else {
            panic!("payload must be an object");
        };
        ToolExecInput::new(name, map)
    }

    #[test]
    fn test_echo_returns_input() {
        tokio_test::block_on(async {
            let registry = ToolRegistry::with_builtins();
            let output = registry
                .execute(
                    input("echo", json!({"text": "ping"})),
                    ActivityContext::new("run-1", 0, 1),
                )
                .await
                .unwrap();
            assert!(output.success);
            assert_eq!(output.result, Some(json!({"text": "ping"})));
        });
    }

    #[test]
    fn test_unknown_tool_is_not_found() {
        tokio_test::block_on(async {
            let registry = ToolRegistry::with_builtins();
            let result = registry
                .execute(input("grep", json!({})), ActivityContext::new("run-1", 0, 1))
                .await;
            assert_eq!(result, Err(ActivityError::ToolNotFound("grep".to_string())));
            assert!(!result.unwrap_err().is_retryable());
        });
    }

    #[test]
    fn test_infrastructure_failure_is_retryable() {
        tokio_test::block_on(async {
            let mut registry = ToolRegistry::new();
            registry.register(Arc::new(SandboxDown));
            assert_eq!(registry.names(), vec!["shell".to_string()]);

            let error = registry
                .execute(input("shell", json!({})), ActivityContext::new("run-1", 1, 2))
                .await
                .unwrap_err();
            assert!(error.is_retryable());
        });
    }
}
