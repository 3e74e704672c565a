//! Run plan - the ordered steps a run executes, derived from its config and input.

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::activity::{
    ActivityRequest, ModelCallInput, ModelCallOutput, ToolExecInput, ToolExecOutput,
};
use crate::types::{RunConfig, RunInput};

pub const DEFAULT_PROMPT: &str = "Hello";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("input.tool_calls must be an array")]
    ToolCallsNotArray,

    #[error("input.tool_calls[{index}] is invalid: {message}")]
    InvalidToolCall { index: usize, message: String },

    #[error("config.{key} must be {expected}")]
    WrongType {
        key: &'static str,
        expected: &'static str,
    },

    #[error("config.on_tool_failure must be 'continue' or 'fail', got '{0}'")]
    UnknownToolFailurePolicy(String),
}

/// What a reported tool failure (`success = false`) does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolFailurePolicy {
    /// Keep going; the failure shows up in `tool_results`.
    #[default]
    Continue,
    /// End the run `Failed` with the tool's error.
    Fail,
}

/// Deterministic step list of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    steps: Vec<ActivityRequest>,
    on_tool_failure: ToolFailurePolicy,
}

impl RunPlan {
    /// Build the plan: one ToolExec step per `input.tool_calls` entry, then
    /// one ModelCall step.
    pub fn build(config: &RunConfig, input: &RunInput) -> Result<Self, PlanError> {
        let mut steps = tool_steps(input)?;
        steps.push(ActivityRequest::ModelCall(model_step(config, input)?));
        Ok(Self {
            steps,
            on_tool_failure: tool_failure_policy(config)?,
        })
    }

    pub fn steps(&self) -> &[ActivityRequest] {
        &self.steps
    }

    pub fn on_tool_failure(&self) -> ToolFailurePolicy {
        self.on_tool_failure
    }

    /// Aggregated run output.
    pub fn render_output(model: &ModelCallOutput, tool_results: &[ToolExecOutput]) -> Value {
        let mut output = Map::new();
        output.insert("response".to_string(), json!(model.content));
        if !tool_results.is_empty() {
            output.insert("tool_results".to_string(), json!(tool_results));
        }
        Value::Object(output)
    }
}

fn tool_steps(input: &RunInput) -> Result<Vec<ActivityRequest>, PlanError> {
    let calls = match input.get("tool_calls") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(calls)) => calls,
        Some(_) => return Err(PlanError::ToolCallsNotArray),
    };

    calls
        .iter()
        .enumerate()
        .map(|(index, call)| {
            serde_json::from_value::<ToolExecInput>(call.clone())
                .map(ActivityRequest::ToolExec)
                .map_err(|e| PlanError::InvalidToolCall {
                    index,
                    message: e.to_string(),
                })
        })
        .collect()
}

fn model_step(config: &RunConfig, input: &RunInput) -> Result<ModelCallInput, PlanError> {
    let prompt = match input.get("prompt") {
        None | Some(Value::Null) => DEFAULT_PROMPT.to_string(),
        Some(Value::String(prompt)) => prompt.clone(),
        Some(other) => other.to_string(),
    };

    let mut request = ModelCallInput::new(prompt);
    match config.get("model") {
        None | Some(Value::Null) => {}
        Some(Value::String(model)) => request = request.with_model(model.as_str()),
        Some(_) => {
            return Err(PlanError::WrongType {
                key: "model",
                expected: "a string",
            })
        }
    }
    match config.get("temperature") {
        None | Some(Value::Null) => {}
        Some(value) => {
            request.temperature = value.as_f64().ok_or(PlanError::WrongType {
                key: "temperature",
                expected: "a number",
            })?
        }
    }
    match config.get("max_tokens") {
        None | Some(Value::Null) => {}
        Some(value) => {
            let max_tokens = value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or(PlanError::WrongType {
                    key: "max_tokens",
                    expected: "a non-negative 32-bit integer",
                })?;
            request.max_tokens = Some(max_tokens);
        }
    }
    Ok(request)
}

fn tool_failure_policy(config: &RunConfig) -> Result<ToolFailurePolicy, PlanError> {
    match config.get("on_tool_failure") {
        None | Some(Value::Null) => Ok(ToolFailurePolicy::default()),
        Some(Value::String(policy)) => match policy.as_str() {
            "continue" => Ok(ToolFailurePolicy::Continue),
            "fail" => Ok(ToolFailurePolicy::Fail),
            other => Err(PlanError::UnknownToolFailurePolicy(other.to_string())),
        },
        Some(_) => Err(PlanError::WrongType {
            key: "on_tool_failure",
            expected: "a string",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_plan_is_one_model_call() {
        let config = RunConfig::new().with("model", json!("gpt-4"));
        let input = RunInput::new().with("prompt", json!("hello"));
        let plan = RunPlan::build(&config, &input).unwrap();

        assert_eq!(plan.steps().len(), 1);
        match &plan.steps()[0] {
            ActivityRequest::ModelCall(call) => {
                assert_eq!(call.prompt, "hello");
                assert_eq!(call.model, "gpt-4");
                assert_eq!(call.temperature, 0.7);
                assert_eq!(call.max_tokens, None);
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert_eq!(plan.on_tool_failure(), ToolFailurePolicy::Continue);
    }

    #[test]
    fn test_missing_prompt_defaults_and_non_string_prompt_is_rendered() {
        let plan = RunPlan::build(&RunConfig::new(), &RunInput::new()).unwrap();
        let ActivityRequest::ModelCall(call) = &plan.steps()[0] else {
            panic!("expected model call");
        };
        assert_eq!(call.prompt, "Hello");

        let input = RunInput::new().with("prompt", json!({"q": 1}));
        let plan = RunPlan::build(&RunConfig::new(), &input).unwrap();
        let ActivityRequest::ModelCall(call) = &plan.steps()[0] else {
            panic!("expected model call");
        };
        assert_eq!(call.prompt, r#"{"q":1}"#);
    }

    #[test]
    fn test_tool_calls_precede_model_call() {
        let input = RunInput::new().with(
            "tool_calls",
            json!([
                {"tool_name": "echo", "tool_input": {"text": "a"}},
                {"tool_name": "search", "tool_input": {}, "timeout_seconds": 10}
            ]),
        );
        let config = RunConfig::new()
            .with("on_tool_failure", json!("fail"))
            .with("max_tokens", json!(256));
        let plan = RunPlan::build(&config, &input).unwrap();

        assert_eq!(plan.steps().len(), 3);
        let ActivityRequest::ToolExec(second) = &plan.steps()[1] else {
            panic!("expected tool step");
        };
        assert_eq!(second.tool_name, "search");
        assert_eq!(second.timeout_seconds, 10);
        let ActivityRequest::ModelCall(call) = &plan.steps()[2] else {
            panic!("expected model call last");
        };
        assert_eq!(call.max_tokens, Some(256));
        assert_eq!(plan.on_tool_failure(), ToolFailurePolicy::Fail);
    }

    #[test]
    fn test_malformed_plans_are_rejected() {
        let not_array = RunInput::new().with("tool_calls", json!("echo"));
        assert_eq!(
            RunPlan::build(&RunConfig::new(), &not_array),
            Err(PlanError::ToolCallsNotArray)
        );

        let missing_name = RunInput::new().with("tool_calls", json!([{"tool_input": {}}]));
        assert!(matches!(
            RunPlan::build(&RunConfig::new(), &missing_name),
            Err(PlanError::InvalidToolCall { index: 0, .. })
        ));

        let bad_temperature = RunConfig::new().with("temperature", json!("hot"));
        assert_eq!(
            RunPlan::build(&bad_temperature, &RunInput::new()),
            Err(PlanError::WrongType {
                key: "temperature",
                expected: "a number"
            })
        );

        let bad_policy = RunConfig::new().with("on_tool_failure", json!("retry"));
        assert_eq!(
            RunPlan::build(&bad_policy, &RunInput::new()),
            Err(PlanError::UnknownToolFailurePolicy("retry".to_string()))
        );
    }

    #[test]
    fn test_render_output() {
        let model = ModelCallOutput::new("hi", "gpt-4");
        assert_eq!(RunPlan::render_output(&model, &[]), json!({"response": "hi"}));

        let tools = vec![ToolExecOutput::reported_failure("boom")];
        assert_eq!(
            RunPlan::render_output(&model, &tools),
            json!({
                "response": "hi",
                "tool_results": [{"success": false, "result": null, "error": "boom"}]
            })
        );
    }
}
