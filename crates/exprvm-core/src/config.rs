use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid interpreter configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Runtime switches of an `Interpreter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterpreterConfig {
    /// Emit a `trace!` event for every executed instruction.
    pub trace_execution: bool,
    /// Record interpreted stack traces on exceptions.
    pub capture_stack_trace: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            trace_execution: false,
            capture_stack_trace: true,
        }
    }
}

impl InterpreterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_trace_execution(mut self, enabled: bool) -> Self {
        self.trace_execution = enabled;
        self
    }

    pub fn with_capture_stack_trace(mut self, enabled: bool) -> Self {
        self.capture_stack_trace = enabled;
        self
    }
}
