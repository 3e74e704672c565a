//! Typed input/output schemas of the two invocable operations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOOL_TIMEOUT_SECONDS: u64 = 60;

/// Input of the model-call activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCallInput {
    pub prompt: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelCallInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: default_model(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

/// Output of the model-call activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCallOutput {
    pub content: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Map<String, Value>>,
}

impl ModelCallOutput {
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            usage: None,
        }
    }
}

/// Input of the tool-execution activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecInput {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Map<String, Value>,
    #[serde(default = "default_tool_timeout")]
    pub timeout_seconds: u64,
}

impl ToolExecInput {
    pub fn new(tool_name: impl Into<String>, tool_input: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_input,
            timeout_seconds: DEFAULT_TOOL_TIMEOUT_SECONDS,
        }
    }
}

fn default_tool_timeout() -> u64 {
    DEFAULT_TOOL_TIMEOUT_SECONDS
}

/// Output of the tool-execution activity.
///
/// `success = false` is a reported failure: it is handed to the run as a
/// normal step result and never retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecOutput {
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolExecOutput {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn reported_failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}
