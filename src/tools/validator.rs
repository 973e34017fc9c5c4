//! Tool call validation: the gate every model-issued call passes before
//! it is executed.
//!
//! Checks run in a fixed order and stop at the first failing category
//! (existence, required parameters, types, constraints), collecting every
//! problem within that category. Validation is pure and never runs the tool.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::schema::{ParamKind, ToolDefinition};

/// Outcome of validating one tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub tool_name: String,
    pub valid: bool,
    pub error: Option<String>,
    pub missing_params: Vec<String>,
    /// Parameter name → violated constraint.
    pub invalid_params: BTreeMap<String, String>,
    /// Set when the named tool is not in the catalog.
    pub unknown_tool: bool,
    /// Legal tool names, filled in when the tool does not exist.
    pub available_tools: Vec<String>,
    /// Expected parameters of the tool, for the recovery prompt.
    pub expected_params: Vec<String>,
}

impl ValidationResult {
    fn ok(tool_name: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            valid: true,
            ..Default::default()
        }
    }

    /// Every rejection is retryable by re-prompting the model.
    pub fn is_retryable(&self) -> bool {
        !self.valid
    }
}

/// Validate `arguments` for `tool_name` against the caller's catalog.
pub fn validate_tool_call(
    tool_name: &str,
    arguments: &Value,
    catalog: &[ToolDefinition],
) -> ValidationResult {
    let Some(tool) = catalog.iter().find(|t| t.name == tool_name) else {
        let available: Vec<String> = catalog.iter().map(|t| t.name.clone()).collect();
        return ValidationResult {
            tool_name: tool_name.to_string(),
            valid: false,
            error: Some(format!(
                "Unknown tool '{}'. Available tools: {}",
                tool_name,
                if available.is_empty() {
                    "(none)".to_string()
                } else {
                    available.join(", ")
                }
            )),
            unknown_tool: true,
            available_tools: available,
            ..Default::default()
        };
    };

    let expected_params: Vec<String> = tool.parameters.iter().map(|p| p.summary()).collect();
    let reject = |error: String, missing: Vec<String>, invalid: BTreeMap<String, String>| {
        ValidationResult {
            tool_name: tool_name.to_string(),
            valid: false,
            error: Some(error),
            missing_params: missing,
            invalid_params: invalid,
            unknown_tool: false,
            available_tools: Vec::new(),
            expected_params: expected_params.clone(),
        }
    };

    // Models routinely omit the arguments object entirely.
    let empty = Map::new();
    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            let mut invalid = BTreeMap::new();
            invalid.insert(
                "arguments".to_string(),
                format!("expected an object, got {}", json_type_name(other)),
            );
            return reject(
                format!("Arguments for '{tool_name}' must be a JSON object"),
                Vec::new(),
                invalid,
            );
        }
    };

    let missing: Vec<String> = tool
        .parameters
        .iter()
        .filter(|p| p.required && !args.contains_key(&p.name))
        .map(|p| p.name.clone())
        .collect();
    if !missing.is_empty() {
        return reject(
            format!(
                "Missing required parameter(s) for '{}': {}",
                tool_name,
                missing.join(", ")
            ),
            missing,
            BTreeMap::new(),
        );
    }

    for key in args.keys() {
        if tool.get_param(key).is_none() {
            tracing::debug!(tool = %tool_name, param = %key, "Ignoring undeclared parameter");
        }
    }

    let mut type_errors = BTreeMap::new();
    for param in &tool.parameters {
        if let Some(value) = args.get(&param.name)
            && !type_matches(&param.kind, value)
        {
            type_errors.insert(
                param.name.clone(),
                format!(
                    "expected {}, got {}",
                    param.kind.type_name(),
                    json_type_name(value)
                ),
            );
        }
    }
    if !type_errors.is_empty() {
        let error = format!(
            "Invalid parameter type(s) for '{}': {}",
            tool_name,
            describe(&type_errors)
        );
        return reject(error, Vec::new(), type_errors);
    }

    let mut constraint_errors = BTreeMap::new();
    for param in &tool.parameters {
        if let Some(value) = args.get(&param.name)
            && let Some(violation) = check_constraints(&param.kind, value)
        {
            constraint_errors.insert(param.name.clone(), violation);
        }
    }
    if !constraint_errors.is_empty() {
        let error = format!(
            "Constraint violation(s) for '{}': {}",
            tool_name,
            describe(&constraint_errors)
        );
        return reject(error, Vec::new(), constraint_errors);
    }

    ValidationResult::ok(tool_name)
}

/// Corrective message for the model after a rejected call.
///
/// Deterministic for a given result so identical mistakes produce identical
/// guidance.
pub fn recovery_prompt(result: &ValidationResult) -> String {
    if result.valid {
        return String::new();
    }

    let mut lines = Vec::new();
    if result.unknown_tool {
        lines.push(format!("The tool `{}` does not exist.", result.tool_name));
        if result.available_tools.is_empty() {
            lines.push("No tools are available; answer without calling a tool.".to_string());
        } else {
            lines.push(format!(
                "Choose one of: {}.",
                result.available_tools.join(", ")
            ));
        }
    } else {
        lines.push(format!(
            "Your call to `{}` was rejected and was NOT executed.",
            result.tool_name
        ));
        for name in &result.missing_params {
            lines.push(format!("- Missing required parameter `{name}`."));
        }
        for (name, problem) in &result.invalid_params {
            lines.push(format!("- Parameter `{name}`: {problem}."));
        }
        if !result.expected_params.is_empty() {
            lines.push(format!(
                "Expected parameters: {}.",
                result.expected_params.join("; ")
            ));
        }
    }
    lines.push("Issue a corrected tool call. Do not repeat the same call.".to_string());
    lines.join("\n")
}

fn describe(problems: &BTreeMap<String, String>) -> String {
    problems
        .iter()
        .map(|(name, problem)| format!("{name} ({problem})"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn type_matches(kind: &ParamKind, value: &Value) -> bool {
    match kind {
        ParamKind::String { .. } => value.is_string(),
        ParamKind::Number { .. } => value.is_number(),
        // JSON has one number type; 5.0 is an integer.
        ParamKind::Integer { .. } => {
            value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|n| n.fract() == 0.0)
        }
        ParamKind::Boolean => value.is_boolean(),
        ParamKind::Array { .. } => value.is_array(),
        ParamKind::Object => value.is_object(),
    }
}

fn check_constraints(kind: &ParamKind, value: &Value) -> Option<String> {
    match kind {
        ParamKind::String {
            allowed,
            min_length,
            max_length,
        } => {
            let s = value.as_str()?;
            if let Some(allowed) = allowed
                && !allowed.iter().any(|a| a == s)
            {
                return Some(format!(
                    "value '{}' is not one of [{}]",
                    s,
                    allowed.join(", ")
                ));
            }
            let len = s.chars().count();
            if let Some(min) = min_length
                && len < *min
            {
                return Some(format!("length {len} is below minLength {min}"));
            }
            if let Some(max) = max_length
                && len > *max
            {
                return Some(format!("length {len} exceeds maxLength {max}"));
            }
            None
        }
        ParamKind::Number { minimum, maximum } | ParamKind::Integer { minimum, maximum } => {
            let n = value.as_f64()?;
            if let Some(min) = minimum
                && n < *min
            {
                return Some(format!("value {n} is below minimum {min}"));
            }
            if let Some(max) = maximum
                && n > *max
            {
                return Some(format!("value {n} exceeds maximum {max}"));
            }
            None
        }
        ParamKind::Array {
            min_items,
            max_items,
        } => {
            let count = value.as_array()?.len();
            if let Some(min) = min_items
                && count < *min
            {
                return Some(format!("{count} items is below minItems {min}"));
            }
            if let Some(max) = max_items
                && count > *max
            {
                return Some(format!("{count} items exceeds maxItems {max}"));
            }
            None
        }
        ParamKind::Boolean | ParamKind::Object => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
