//! Default model-call body.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use agentrun_core::activity::{
    ActivityContext, ActivityError, ModelCallActivity, ModelCallInput, ModelCallOutput,
};
use agentrun_core::truncate_for_log;

const PROMPT_PREVIEW_CHARS: usize = 50;

/// Stand-in model that answers without calling any provider.
///
/// Useful for wiring tests and local runs; responses are deterministic so
/// at-least-once redelivery is trivially idempotent.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderModelCall;

impl PlaceholderModelCall {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelCallActivity for PlaceholderModelCall {
    async fn call(
        &self,
        input: ModelCallInput,
        ctx: ActivityContext,
    ) -> Result<ModelCallOutput, ActivityError> {
        if input.model.trim().is_empty() {
            return Err(ActivityError::invalid_request("model must not be empty"));
        }
        tracing::info!(
            run_id = %ctx.run_id,
            step = ctx.step,
            attempt = ctx.attempt,
            model = %input.model,
            "calling model"
        );

        let preview: String = input.prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
        tracing::debug!(prompt = %truncate_for_log(&input.prompt, 200), "placeholder prompt");
        let mut output = ModelCallOutput::new(
            format!("[Placeholder response for: {}...]", preview),
            input.model,
        );
        output.usage = Some(zero_usage());
        Ok(output)
    }
}

fn zero_usage() -> Map<String, Value> {
    let mut usage = Map::new();
    usage.insert("prompt_tokens".to_string(), json!(0));
    usage.insert("completion_tokens".to_string(), json!(0));
    usage
}
