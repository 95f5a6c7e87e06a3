use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Optional per-request overrides. The pipeline only ever reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingContext {
    #[serde(default)]
    pub user_instructions: Option<String>,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub analysis_model: Option<String>,
    #[serde(default)]
    pub generation_model: Option<String>,
    /// Free-form knobs: `temperature`, `max_output_tokens`, `top_p`,
    /// `request_timeout` (seconds) and `max_attempts`.
    #[serde(default)]
    pub model_parameters: Map<String, Value>,
}

impl ProcessingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.user_instructions = Some(instructions.into());
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_analysis_model(mut self, model: impl Into<String>) -> Self {
        self.analysis_model = Some(model.into());
        self
    }

    pub fn with_generation_model(mut self, model: impl Into<String>) -> Self {
        self.generation_model = Some(model.into());
        self
    }

    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.model_parameters.insert(key.to_string(), value);
        self
    }

    pub fn user_instructions(&self) -> Option<&str> {
        non_blank(self.user_instructions.as_deref())
    }

    pub fn system_instruction(&self) -> Option<&str> {
        non_blank(self.system_instruction.as_deref())
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.model_parameters.get(key)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
