//! Reasoning step log and run outcome.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::endpoints::Tier;
use crate::llm::ChatMessage;

/// What produced a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// A tool call the model asked for, executed.
    ModelAction,
    /// A tool call rejected by validation; not executed.
    ValidationRejected,
    /// A call the loop issued because fresh data was required.
    ForcedFreshness,
    /// A tool call that errored or timed out.
    ToolFailure,
    /// A repeat of an earlier call; served from the earlier observation.
    Duplicate,
    /// The model produced neither a tool call nor a final answer.
    Nudge,
    FinalAnswer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningStep {
    /// 1-based round that produced the step.
    pub iteration: usize,
    pub kind: StepKind,
    pub thought: Option<String>,
    pub action: Option<String>,
    pub action_input: Option<Value>,
    pub observation: Option<String>,
    pub final_answer: Option<String>,
    /// Tier that generated the model output for this round.
    pub tier: Option<Tier>,
}

impl ReasoningStep {
    pub(crate) fn new(iteration: usize, kind: StepKind) -> Self {
        Self {
            iteration,
            kind,
            thought: None,
            action: None,
            action_input: None,
            observation: None,
            final_answer: None,
            tier: None,
        }
    }

    /// Replay this step as prompt history.
    pub(crate) fn to_messages(&self, max_observation_chars: usize) -> Vec<ChatMessage> {
        let mut lines = Vec::new();
        if let Some(thought) = &self.thought {
            lines.push(format!("Thought: {thought}"));
        }
        if let Some(action) = &self.action {
            lines.push(format!("Action: {action}"));
            let input = self
                .action_input
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_else(|| "{}".to_string());
            lines.push(format!("Action Input: {input}"));
        }
        if let Some(answer) = &self.final_answer {
            lines.push(format!("Final Answer: {answer}"));
        }

        let mut messages = Vec::with_capacity(2);
        if !lines.is_empty() {
            messages.push(ChatMessage::assistant(lines.join("\n")));
        }
        if let Some(observation) = &self.observation {
            messages.push(ChatMessage::user(format!(
                "Observation: {}",
                truncate_observation(observation, max_observation_chars)
            )));
        }
        messages
    }
}

/// Result of one agent run. Failed runs keep the partial log.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRun {
    pub run_id: Uuid,
    pub role: String,
    pub success: bool,
    /// Final answer, or the best partial answer on failure (possibly empty).
    pub final_answer: String,
    pub steps: Vec<ReasoningStep>,
    pub iterations: usize,
    pub tools_executed: usize,
    pub error: Option<String>,
}

/// Cap an observation at `max_chars` characters.
pub fn truncate_observation(output: &str, max_chars: usize) -> String {
    match output.char_indices().nth(max_chars) {
        // char_indices gives byte offsets at char boundaries, so the slice is valid UTF-8.
        Some((byte_offset, _)) => format!("{}... [truncated]", &output[..byte_offset]),
        None => output.to_string(),
    }
}
