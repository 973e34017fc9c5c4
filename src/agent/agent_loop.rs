//! Bounded Thought → Action → Observation loop.
//!
//! Each round asks the model (through the [`Router`]), parses its output,
//! and then either executes tool calls, forces a freshness lookup, nudges
//! the model toward an answer, or finishes. Tool calls are validated
//! against the role-filtered catalog before anything runs.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::agent::step::{AgentRun, ReasoningStep, StepKind};
use crate::agents::AgentRole;
use crate::config::AgentLoopConfig;
use crate::endpoints::Tier;
use crate::error::{AgentError, ToolExecError};
use crate::llm::{ChatMessage, Generation, SamplingParams, ToolCall, parse_generation};
use crate::router::{RouteRequest, Router};
use crate::tools::{ToolDefinition, ToolExecutor, recovery_prompt, validate_tool_call};

const NUDGE: &str = "No tool call or final answer was found in your reply. \
If you know the answer, reply with `Final Answer: <answer>`. \
Otherwise call one of the available tools.";

/// Core dependencies for the loop.
pub struct ReasoningLoop {
    router: Arc<Router>,
    tools: Arc<dyn ToolExecutor>,
    config: AgentLoopConfig,
}

/// Per-run mutable state.
struct RunState<'a> {
    role: &'a AgentRole,
    task: &'a str,
    catalog: Vec<ToolDefinition>,
    steps: Vec<ReasoningStep>,
    /// Fingerprint → observation of every successful call.
    executed: HashMap<String, String>,
    tools_executed: usize,
    tools_attempted: usize,
    best_partial: String,
}

/// Result of handling one round's tool calls.
struct RoundOutcome {
    /// Every call was already satisfied by an earlier round.
    all_satisfied: bool,
}

impl ReasoningLoop {
    pub fn new(router: Arc<Router>, tools: Arc<dyn ToolExecutor>, config: AgentLoopConfig) -> Self {
        Self {
            router,
            tools,
            config,
        }
    }

    pub fn config(&self) -> &AgentLoopConfig {
        &self.config
    }

    /// Run `task` as `role`. Only an empty task is an `Err`; every other
    /// failure comes back as an unsuccessful [`AgentRun`].
    pub async fn run(
        &self,
        role: &AgentRole,
        task: &str,
        freshness_required: bool,
        catalog: &[ToolDefinition],
    ) -> Result<AgentRun, AgentError> {
        let task = task.trim();
        if task.is_empty() {
            return Err(AgentError::EmptyTask);
        }

        let run_id = Uuid::new_v4();
        let mut state = RunState {
            role,
            task,
            catalog: role.filter_catalog(catalog),
            steps: Vec::new(),
            executed: HashMap::new(),
            tools_executed: 0,
            tools_attempted: 0,
            best_partial: String::new(),
        };
        tracing::info!(
            run_id = %run_id,
            role = %role.name,
            tools = state.catalog.len(),
            freshness_required,
            "Agent run started"
        );

        let max_iterations = self.config.max_iterations.max(1);
        for iteration in 1..=max_iterations {
            let request = self.build_request(&state, freshness_required);
            let routed = match self.router.route_request(request).await {
                Ok(routed) => routed,
                Err(e) => {
                    tracing::warn!(
                        run_id = %run_id,
                        iteration,
                        error = %e,
                        "Agent run aborted by router"
                    );
                    return Ok(finish(run_id, state, false, iteration, Some(e.to_string())));
                }
            };
            let tier = routed.tier;
            let parsed = parse_generation(&Generation {
                text: routed.output,
                tool_calls: routed.tool_calls,
                reasoning_trace: routed.reasoning_trace,
                confidence: Some(routed.confidence),
                usage: routed.usage,
            });
            tracing::debug!(
                run_id = %run_id,
                iteration,
                kind = ?parsed.kind(),
                tier = %tier,
                "Model responded"
            );

            if let Some(answer) = &parsed.final_answer {
                state.best_partial = answer.clone();
            } else if state.best_partial.is_empty() && !parsed.text.is_empty() {
                state.best_partial = parsed.text.clone();
            }

            if !parsed.tool_calls.is_empty() {
                let outcome = self
                    .handle_calls(
                        &mut state,
                        iteration,
                        tier,
                        parsed.thought.clone(),
                        &parsed.tool_calls,
                    )
                    .await;
                if let Some(answer) = parsed.final_answer
                    && outcome.all_satisfied
                {
                    let mut step = ReasoningStep::new(iteration, StepKind::FinalAnswer);
                    step.final_answer = Some(answer.clone());
                    step.tier = Some(tier);
                    state.steps.push(step);
                    state.best_partial = answer;
                    return Ok(finish(run_id, state, true, iteration, None));
                }
                continue;
            }

            if freshness_required
                && state.tools_attempted == 0
                && self
                    .force_freshness(&mut state, iteration, tier, parsed.thought.clone())
                    .await
            {
                continue;
            }

            match parsed.final_answer {
                Some(answer) => {
                    let mut step = ReasoningStep::new(iteration, StepKind::FinalAnswer);
                    step.thought = parsed.thought;
                    step.final_answer = Some(answer);
                    step.tier = Some(tier);
                    state.steps.push(step);
                    return Ok(finish(run_id, state, true, iteration, None));
                }
                None => {
                    let mut step = ReasoningStep::new(iteration, StepKind::Nudge);
                    step.thought = parsed.thought.or_else(|| {
                        (!parsed.text.is_empty()).then(|| parsed.text.clone())
                    });
                    step.observation = Some(NUDGE.to_string());
                    step.tier = Some(tier);
                    state.steps.push(step);
                }
            }
        }

        tracing::warn!(run_id = %run_id, max_iterations, "Agent run exhausted its iterations");
        let reason = format!("max iterations ({max_iterations}) reached without a final answer");
        Ok(finish(run_id, state, false, max_iterations, Some(reason)))
    }

    fn build_request(&self, state: &RunState<'_>, freshness_required: bool) -> RouteRequest {
        let mut task = state.task.to_string();
        if freshness_required {
            task.push_str(
                "\n\nThis task needs up-to-date information. Use a tool to look it up before answering.",
            );
        }

        let window = self.config.history_window;
        let start = state.steps.len().saturating_sub(window);
        let mut messages = vec![ChatMessage::user(task)];
        for step in &state.steps[start..] {
            messages.extend(step.to_messages(self.config.max_observation_chars));
        }

        RouteRequest::new(String::new())
            .with_tier(state.role.tier)
            .with_fallback(state.role.fallback)
            .with_system_prompt(state.role.render_system_prompt(&state.catalog))
            .with_messages(messages)
            .with_sampling(SamplingParams {
                max_tokens: Some(state.role.max_tokens),
                temperature: Some(state.role.temperature),
            })
            .with_tools(state.catalog.clone())
            .without_cache()
    }

    async fn handle_calls(
        &self,
        state: &mut RunState<'_>,
        iteration: usize,
        tier: Tier,
        mut thought: Option<String>,
        calls: &[ToolCall],
    ) -> RoundOutcome {
        let mut all_satisfied = true;
        for call in calls {
            let mut step = ReasoningStep::new(iteration, StepKind::ModelAction);
            step.thought = thought.take();
            step.action = Some(call.name.clone());
            step.action_input = Some(call.arguments.clone());
            step.tier = Some(tier);

            let key = fingerprint(&call.name, &call.arguments);
            if let Some(previous) = state.executed.get(&key) {
                tracing::debug!(tool = %call.name, "Duplicate tool call, reusing observation");
                step.kind = StepKind::Duplicate;
                step.observation = Some(format!(
                    "You already called {} with these arguments. Result: {}",
                    call.name, previous
                ));
                state.steps.push(step);
                continue;
            }

            all_satisfied = false;
            let validation = validate_tool_call(&call.name, &call.arguments, &state.catalog);
            if !validation.valid {
                tracing::info!(
                    tool = %call.name,
                    error = validation.error.as_deref().unwrap_or_default(),
                    "Rejected tool call"
                );
                step.kind = StepKind::ValidationRejected;
                step.observation = Some(recovery_prompt(&validation));
                state.steps.push(step);
                continue;
            }

            self.execute(state, &mut step, &call.name, call.arguments.clone(), key)
                .await;
            state.steps.push(step);
        }
        RoundOutcome { all_satisfied }
    }

    /// Issue the freshness tool on the model's behalf. Returns false when
    /// the tool is not available to this run.
    async fn force_freshness(
        &self,
        state: &mut RunState<'_>,
        iteration: usize,
        tier: Tier,
        thought: Option<String>,
    ) -> bool {
        let name = self.config.freshness_tool.clone();
        let mut args = Map::new();
        args.insert(
            self.config.freshness_arg.clone(),
            Value::String(state.task.to_string()),
        );
        let arguments = Value::Object(args);
        let validation = validate_tool_call(&name, &arguments, &state.catalog);
        if !validation.valid {
            tracing::warn!(
                tool = %name,
                error = validation.error.as_deref().unwrap_or_default(),
                "Freshness required but the freshness tool cannot be called"
            );
            return false;
        }

        tracing::info!(tool = %name, "Forcing freshness lookup");
        let mut step = ReasoningStep::new(iteration, StepKind::ForcedFreshness);
        step.thought = thought;
        step.action = Some(name.clone());
        step.action_input = Some(arguments.clone());
        step.tier = Some(tier);

        let key = fingerprint(&name, &arguments);
        self.execute(state, &mut step, &name, arguments, key).await;
        // A failed forced lookup still counts as the forced step.
        step.kind = StepKind::ForcedFreshness;
        state.steps.push(step);
        true
    }

    /// Execute a validated call under the tool timeout. Failures become
    /// observations.
    async fn execute(
        &self,
        state: &mut RunState<'_>,
        step: &mut ReasoningStep,
        name: &str,
        arguments: Value,
        key: String,
    ) {
        state.tools_attempted += 1;
        let timeout = self.config.tool_timeout;
        let outcome = tokio::time::timeout(timeout, self.tools.execute(name, arguments))
            .await
            .unwrap_or_else(|_| {
                Err(ToolExecError::Timeout {
                    name: name.to_string(),
                    timeout,
                })
            });
        match outcome {
            Ok(output) => {
                tracing::debug!(
                    tool = %name,
                    elapsed_ms = output.duration.as_millis() as u64,
                    "Tool call succeeded"
                );
                state.tools_executed += 1;
                state.executed.insert(key, output.content.clone());
                step.observation = Some(output.content);
            }
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "Tool call failed");
                step.kind = StepKind::ToolFailure;
                step.observation = Some(format!("tool {name} failed: {e}"));
            }
        }
    }
}

/// Name plus canonical (key-sorted) arguments.
fn fingerprint(name: &str, arguments: &Value) -> String {
    format!("{name}:{arguments}")
}

fn finish(
    run_id: Uuid,
    state: RunState<'_>,
    success: bool,
    iterations: usize,
    error: Option<String>,
) -> AgentRun {
    tracing::info!(
        run_id = %run_id,
        success,
        iterations,
        steps = state.steps.len(),
        tools_executed = state.tools_executed,
        "Agent run finished"
    );
    AgentRun {
        run_id,
        role: state.role.name.clone(),
        success,
        final_answer: state.best_partial,
        steps: state.steps,
        iterations,
        tools_executed: state.tools_executed,
        error,
    }
}
