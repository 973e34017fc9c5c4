//! Response parsing: turns free-form model text into tool calls and a
//! final answer.
//!
//! Recognised forms, in any mix:
//!
//! ```text
//! <think>private reasoning</think>
//! Thought: I should look this up
//! Action: web_search
//! Action Input: {"query": "rust 2024 edition"}
//! <tool_call>{"name": "web_search", "arguments": {"query": "..."}}</tool_call>
//! Final Answer: ...
//! ```
//!
//! Tool calls and the final answer are extracted independently; deciding
//! what to do when both are present is the reasoning loop's job.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use super::provider::{Generation, ToolCall};

static THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid think regex"));

static TOOL_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<tool_call>\s*(.*?)\s*</tool_call>").expect("valid tool_call regex")
});

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*\**\s*(thought|action input|action|final answer|observation)\s*\**\s*:\s*\**\s*(.*)$")
        .expect("valid label regex")
});

/// Shape of a parsed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    ToolCalls,
    FinalAnswer,
    /// Tool calls alongside a final answer.
    Both,
    /// Neither tool calls nor a final answer.
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub thought: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub final_answer: Option<String>,
    /// Content of `<think>` blocks plus any backend-reported trace.
    pub reasoning_trace: Option<String>,
    /// Visible text with think and tool-call tags removed.
    pub text: String,
}

impl ParsedResponse {
    pub fn kind(&self) -> ResponseKind {
        match (self.tool_calls.is_empty(), self.final_answer.is_some()) {
            (false, true) => ResponseKind::Both,
            (false, false) => ResponseKind::ToolCalls,
            (true, true) => ResponseKind::FinalAnswer,
            (true, false) => ResponseKind::Empty,
        }
    }
}

/// Parse a backend generation, merging its structured tool calls (first)
/// with any calls written into the text.
pub fn parse_generation(generation: &Generation) -> ParsedResponse {
    let mut parsed = parse_response(&generation.text);

    if !generation.tool_calls.is_empty() {
        let mut calls = generation.tool_calls.clone();
        for call in parsed.tool_calls.drain(..) {
            if !calls
                .iter()
                .any(|c| c.name == call.name && c.arguments == call.arguments)
            {
                calls.push(call);
            }
        }
        parsed.tool_calls = calls;
    }

    if let Some(trace) = &generation.reasoning_trace {
        parsed.reasoning_trace = Some(match parsed.reasoning_trace.take() {
            Some(inline) => format!("{trace}\n{inline}"),
            None => trace.clone(),
        });
    }
    parsed
}

/// Parse raw model text.
pub fn parse_response(raw: &str) -> ParsedResponse {
    let (visible, trace) = strip_thinking(raw);
    let (visible, mut tool_calls) = extract_tagged_calls(&visible);
    let sections = scan_labels(&visible);

    tool_calls.extend(sections.actions.into_iter().filter_map(|(name, input)| {
        let name = name.trim().trim_matches('`').trim().to_string();
        if name.is_empty() || name.eq_ignore_ascii_case("none") {
            return None;
        }
        Some(ToolCall::new(name, parse_action_input(&input)))
    }));

    ParsedResponse {
        thought: non_empty(sections.thought),
        tool_calls,
        final_answer: non_empty(sections.final_answer),
        reasoning_trace: trace,
        text: visible.trim().to_string(),
    }
}

/// Remove `<think>` blocks. An unclosed `<think>` swallows the rest of the
/// text.
pub fn strip_thinking(raw: &str) -> (String, Option<String>) {
    let mut traces: Vec<String> = THINK_RE
        .captures_iter(raw)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let mut visible = THINK_RE.replace_all(raw, "").into_owned();

    if let Some(idx) = visible.find("<think>") {
        let tail = visible[idx + "<think>".len()..].trim().to_string();
        if !tail.is_empty() {
            traces.push(tail);
        }
        visible.truncate(idx);
    }

    let trace = if traces.is_empty() {
        None
    } else {
        Some(traces.join("\n"))
    };
    (visible, trace)
}

fn extract_tagged_calls(text: &str) -> (String, Vec<ToolCall>) {
    let mut calls = Vec::new();
    for caps in TOOL_TAG_RE.captures_iter(text) {
        let Some(body) = caps.get(1) else { continue };
        match serde_json::from_str::<Value>(body.as_str()) {
            Ok(value) => {
                let Some(name) = value.get("name").and_then(|v| v.as_str()) else {
                    tracing::debug!(body = %body.as_str(), "Tagged tool call has no name");
                    continue;
                };
                let arguments = value
                    .get("arguments")
                    .or_else(|| value.get("parameters"))
                    .cloned()
                    .map(|args| match args {
                        // Some servers double-encode arguments.
                        Value::String(s) => parse_action_input(&s),
                        other => other,
                    })
                    .unwrap_or(Value::Null);
                calls.push(ToolCall::new(name, arguments));
            }
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed tagged tool call");
            }
        }
    }
    (TOOL_TAG_RE.replace_all(text, "").into_owned(), calls)
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Thought,
    Action,
    ActionInput,
    FinalAnswer,
}

#[derive(Default)]
struct Sections {
    thought: String,
    actions: Vec<(String, String)>,
    final_answer: String,
}

fn scan_labels(text: &str) -> Sections {
    let mut out = Sections::default();
    let mut section = Section::None;

    for line in text.lines() {
        if let Some(caps) = LABEL_RE.captures(line) {
            let label = caps.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
            let rest = caps.get(2).map_or("", |m| m.as_str());
            section = match label.as_str() {
                "thought" => Section::Thought,
                "action" => {
                    out.actions.push((rest.to_string(), String::new()));
                    Section::Action
                }
                "action input" => Section::ActionInput,
                "final answer" => Section::FinalAnswer,
                // The model is inventing tool results; nothing after this is trusted.
                _ => break,
            };
            if section != Section::Action {
                append(&mut out, section, rest);
            }
            continue;
        }
        append(&mut out, section, line);
    }
    out
}

fn append(out: &mut Sections, section: Section, line: &str) {
    let target = match section {
        Section::Thought => &mut out.thought,
        Section::ActionInput => match out.actions.last_mut() {
            Some((_, input)) => input,
            None => return,
        },
        Section::FinalAnswer => &mut out.final_answer,
        Section::Action | Section::None => return,
    };
    if !target.is_empty() {
        target.push('\n');
    }
    target.push_str(line);
}

/// Parse an `Action Input` body. Falls back to the outermost `{...}` span,
/// then to the raw string (which the validator rejects as a non-object).
fn parse_action_input(input: &str) -> Value {
    let trimmed = input
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if trimmed.is_empty() {
        return Value::Object(Map::new());
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return value;
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
        && let Ok(value) = serde_json::from_str(&trimmed[start..=end])
    {
        return value;
    }
    Value::String(trimmed.to_string())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
