//! Tool registry for managing available tools.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::ToolExecError;
use crate::tools::schema::ToolDefinition;
use crate::tools::tool::{Tool, ToolExecutor, ToolOutput};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool, replacing any previous tool with the same name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.write().await.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replaced existing tool registration");
        }
        tracing::debug!("Registered tool: {}", name);
    }

    /// Register a tool (sync version for startup).
    pub fn register_sync(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if let Ok(mut tools) = self.tools.try_write() {
            tools.insert(name.clone(), tool);
            tracing::debug!("Registered tool: {}", name);
        }
    }

    /// Unregister a tool.
    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.write().await.remove(name)
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Check if a tool exists.
    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// List all tool names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of registered tools.
    pub fn count(&self) -> usize {
        self.tools.try_read().map(|t| t.len()).unwrap_or(0)
    }

    /// Definitions of every registered tool, sorted by name.
    pub async fn catalog(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .await
            .values()
            .map(|tool| tool.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Get tool definitions for specific tools. Unknown names are skipped.
    pub async fn catalog_for(&self, names: &[&str]) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        names
            .iter()
            .filter_map(|name| tools.get(*name))
            .map(|tool| tool.definition())
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolExecError> {
        let tool = self.get(name).await.ok_or_else(|| ToolExecError::NotFound {
            name: name.to_string(),
        })?;

        let start = Instant::now();
        let result = tool.execute(arguments).await;
        tracing::debug!(
            tool = %name,
            ok = result.is_ok(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tool executed"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::schema::{ParamKind, ParamSpec};
    use std::time::Duration;

    #[derive(Debug)]
    struct MockTool {
        name: String,
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "A mock tool for testing"
        }
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(&self.name, self.description())
                .param(ParamSpec::new("input", ParamKind::string()).required())
        }
        async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolExecError> {
            let input = arguments["input"].as_str().unwrap_or_default();
            if input == "boom" {
                return Err(ToolExecError::ExecutionFailed {
                    name: self.name.clone(),
                    reason: "exploded".into(),
                });
            }
            Ok(ToolOutput::text(
                format!("{}: {}", self.name, input),
                Duration::from_millis(1),
            ))
        }
    }

    fn mock(name: &str) -> Arc<dyn Tool> {
        Arc::new(MockTool {
            name: name.to_string(),
        })
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(mock("test_tool")).await;

        assert!(registry.has("test_tool").await);
        assert!(!registry.has("nonexistent").await);

        let retrieved = registry.get("test_tool").await;
        assert_eq!(retrieved.unwrap().name(), "test_tool");
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = ToolRegistry::new();
        registry.register(mock("temp")).await;
        assert!(registry.unregister("temp").await.is_some());
        assert!(!registry.has("temp").await);
    }

    #[tokio::test]
    async fn test_catalog_sorted() {
        let registry = ToolRegistry::new();
        registry.register_sync(mock("web_search"));
        registry.register_sync(mock("calculator"));

        assert_eq!(registry.count(), 2);
        let names: Vec<String> = registry.catalog().await.into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["calculator", "web_search"]);

        let subset = registry.catalog_for(&["web_search", "missing"]).await;
        assert_eq!(subset.len(), 1);
        assert!(subset[0].get_param("input").is_some_and(|p| p.required));
    }

    #[tokio::test]
    async fn test_execute_dispatches_by_name() {
        let registry = ToolRegistry::new();
        registry.register(mock("echo")).await;

        let out = registry
            .execute("echo", serde_json::json!({"input": "hi"}))
            .await
            .unwrap();
        assert_eq!(out.content, "echo: hi");

        let err = registry
            .execute("echo", serde_json::json!({"input": "boom"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolExecError::ExecutionFailed { .. }));

        let err = registry.execute("nope", Value::Null).await.unwrap_err();
        assert!(matches!(err, ToolExecError::NotFound { .. }));
    }
}
