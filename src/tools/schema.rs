//! Typed tool parameter schemas.
//!
//! Tools publish JSON Schema for function calling; the validator works on
//! this typed form instead, one tagged variant per parameter kind with its
//! own constraint set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Declared kind of a parameter, with the constraints that apply to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParamKind {
    String {
        #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
        allowed: Option<Vec<String>>,
        #[serde(default, rename = "minLength", skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        #[serde(default, rename = "maxLength", skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    /// Accepts integers and floats.
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
    },
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
    },
    Boolean,
    Array {
        #[serde(default, rename = "minItems", skip_serializing_if = "Option::is_none")]
        min_items: Option<usize>,
        #[serde(default, rename = "maxItems", skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
    Object,
}

impl ParamKind {
    pub fn string() -> Self {
        Self::String {
            allowed: None,
            min_length: None,
            max_length: None,
        }
    }

    pub fn number() -> Self {
        Self::Number {
            minimum: None,
            maximum: None,
        }
    }

    pub fn integer() -> Self {
        Self::Integer {
            minimum: None,
            maximum: None,
        }
    }

    pub fn array() -> Self {
        Self::Array {
            min_items: None,
            max_items: None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::Number { .. } => "number",
            Self::Integer { .. } => "integer",
            Self::Boolean => "boolean",
            Self::Array { .. } => "array",
            Self::Object => "object",
        }
    }
}

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            required: false,
            kind,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Restrict a string parameter to a fixed set of values.
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let ParamKind::String { allowed, .. } = &mut self.kind {
            *allowed = Some(values.into_iter().map(Into::into).collect());
        }
        self
    }

    /// Length bounds for strings, item-count bounds for arrays.
    pub fn length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        match &mut self.kind {
            ParamKind::String {
                min_length,
                max_length,
                ..
            } => {
                *min_length = min;
                *max_length = max;
            }
            ParamKind::Array {
                min_items,
                max_items,
            } => {
                *min_items = min;
                *max_items = max;
            }
            _ => {}
        }
        self
    }

    /// Value bounds for numbers and integers.
    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        if let ParamKind::Number { minimum, maximum } | ParamKind::Integer { minimum, maximum } =
            &mut self.kind
        {
            *minimum = min;
            *maximum = max;
        }
        self
    }

    /// Human-readable one-liner, e.g. `query (string, required)`.
    pub fn summary(&self) -> String {
        let mut parts = vec![self.kind.type_name().to_string()];
        if self.required {
            parts.push("required".to_string());
        }
        if let ParamKind::String {
            allowed: Some(values),
            ..
        } = &self.kind
        {
            parts.push(format!("one of: {}", values.join(", ")));
        }
        format!("{} ({})", self.name, parts.join(", "))
    }
}

/// Error converting a JSON Schema into a typed definition.
#[derive(Debug, thiserror::Error)]
#[error("invalid schema for tool {tool}: {reason}")]
pub struct SchemaError {
    pub tool: String,
    pub reason: String,
}

/// A tool the model may call, as supplied by the caller for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn get_param(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Build from an object-typed JSON Schema (`properties` + `required`).
    pub fn from_json_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: &Value,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        let err = |reason: String| SchemaError {
            tool: name.clone(),
            reason,
        };

        let required: Vec<&str> = schema
            .get("required")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let mut parameters = Vec::new();
        if let Some(properties) = schema.get("properties") {
            let properties = properties
                .as_object()
                .ok_or_else(|| err("properties must be an object".to_string()))?;
            for (param_name, prop) in properties {
                let kind: ParamKind = serde_json::from_value(prop.clone())
                    .map_err(|e| err(format!("parameter {param_name}: {e}")))?;
                let description = prop
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                parameters.push(ParamSpec {
                    name: param_name.clone(),
                    description,
                    required: required.contains(&param_name.as_str()),
                    kind,
                });
            }
        }

        for req in &required {
            if !parameters.iter().any(|p| p.name == *req) {
                return Err(err(format!("required parameter {req} is not declared")));
            }
        }

        Ok(Self {
            name,
            description: description.into(),
            parameters,
        })
    }

    /// JSON Schema form for function-calling requests.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut prop = serde_json::to_value(&param.kind).unwrap_or_else(|_| json!({}));
            if !param.description.is_empty()
                && let Some(obj) = prop.as_object_mut()
            {
                obj.insert("description".to_string(), json!(param.description));
            }
            properties.insert(param.name.clone(), prop);
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_schema_with_constraints() {
        let schema = json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 3, "description": "Search terms"},
                "mode": {"type": "string", "enum": ["fast", "deep"]},
                "limit": {"type": "integer", "minimum": 1, "maximum": 50},
                "tags": {"type": "array", "maxItems": 5}
            },
            "required": ["query"]
        });
        let def =
            ToolDefinition::from_json_schema("web_search", "Search the web", &schema).unwrap();

        let query = def.get_param("query").unwrap();
        assert!(query.required);
        assert_eq!(query.description, "Search terms");
        assert_eq!(
            query.kind,
            ParamKind::String {
                allowed: None,
                min_length: Some(3),
                max_length: None
            }
        );

        let limit = def.get_param("limit").unwrap();
        assert!(!limit.required);
        assert_eq!(
            limit.kind,
            ParamKind::Integer {
                minimum: Some(1.0),
                maximum: Some(50.0)
            }
        );

        match &def.get_param("mode").unwrap().kind {
            ParamKind::String { allowed, .. } => {
                assert_eq!(allowed.as_deref(), Some(&["fast".to_string(), "deep".to_string()][..]))
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_type() {
        let schema = json!({"properties": {"x": {"type": "datetime"}}});
        assert!(ToolDefinition::from_json_schema("t", "", &schema).is_err());
    }

    #[test]
    fn rejects_undeclared_required() {
        let schema = json!({"properties": {}, "required": ["ghost"]});
        let err = ToolDefinition::from_json_schema("t", "", &schema).unwrap_err();
        assert!(err.reason.contains("ghost"));
    }

    #[test]
    fn schema_without_properties_is_empty() {
        let def = ToolDefinition::from_json_schema("ping", "", &json!({"type": "object"})).unwrap();
        assert!(def.parameters.is_empty());
    }

    #[test]
    fn to_json_schema_uses_schema_keywords() {
        let def = ToolDefinition::new("lookup", "")
            .param(ParamSpec::new("q", ParamKind::string()).required().length(Some(2), None))
            .param(ParamSpec::new("n", ParamKind::integer()).range(Some(1.0), None));
        let schema = def.to_json_schema();

        assert_eq!(schema["properties"]["q"]["type"], "string");
        assert_eq!(schema["properties"]["q"]["minLength"], 2);
        assert_eq!(schema["properties"]["n"]["minimum"], 1.0);
        assert_eq!(schema["required"], json!(["q"]));

        let reparsed = ToolDefinition::from_json_schema("lookup", "", &schema).unwrap();
        assert_eq!(reparsed.get_param("q"), def.get_param("q"));
    }

    #[test]
    fn summary_lists_enum() {
        let spec = ParamSpec::new("unit", ParamKind::string())
            .required()
            .one_of(["mm", "in"]);
        assert_eq!(spec.summary(), "unit (string, required, one of: mm, in)");
    }
}
