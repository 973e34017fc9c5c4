//! Model backend seam and the request/response types that cross it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::endpoints::{EndpointConfig, Tier};
use crate::error::LlmError;
use crate::tools::ToolDefinition;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// Sampling parameters. `None` leaves the server default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Everything a backend needs for one generation.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub sampling: SamplingParams,
    /// Tools offered for native function calling. Empty for tiers without
    /// tool support; those only see the tool list in the prompt text.
    pub tools: Vec<ToolDefinition>,
}

/// Token usage from an LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// What a backend returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub text: String,
    /// Structured tool calls, when the server supports native calling.
    pub tool_calls: Vec<ToolCall>,
    pub reasoning_trace: Option<String>,
    /// Backend-reported confidence in `[0, 1]`.
    pub confidence: Option<f32>,
    pub usage: TokenUsage,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.usage = TokenUsage {
            input_tokens,
            output_tokens,
        };
        self
    }
}

/// Transport to a model server. One implementation serves every tier; the
/// endpoint tells it where and which model.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(
        &self,
        tier: Tier,
        endpoint: &EndpointConfig,
        request: GenerationRequest,
    ) -> Result<Generation, LlmError>;
}
