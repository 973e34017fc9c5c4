//! Tool seam: what the reasoning loop calls once a tool call has passed
//! validation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::ToolExecError;
use crate::tools::schema::ToolDefinition;

/// Output of a tool execution, fed back to the model as an observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub content: String,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>, duration: Duration) -> Self {
        Self {
            content: content.into(),
            duration,
        }
    }
}

/// Executes a named tool. The reasoning loop only ever sees this trait.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolExecError>;
}

/// A single tool that can be registered with a [`ToolRegistry`](super::ToolRegistry).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Typed parameter schema, used both for validation and for
    /// function-calling requests.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description())
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolExecError>;
}
