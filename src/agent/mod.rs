//! Reasoning loop: drives a role through model rounds and tool calls.

pub mod agent_loop;
pub mod step;

pub use agent_loop::ReasoningLoop;
pub use step::{AgentRun, ReasoningStep, StepKind, truncate_observation};
