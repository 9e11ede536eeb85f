//! Tool registry contract.
//!
//! Plans reference tools by name; lookup is an explicit fallible operation
//! and execution is timed. The engine expects `web_search`,
//! `idea_verification`, and `knowledge_query` to exist but degrades
//! gracefully when they do not.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::debug;

/// Result of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Value,
    pub error: Option<String>,
    /// Wall-clock seconds
    pub execution_time: f64,
}

impl ToolResult {
    pub fn ok(data: Value, execution_time: f64) -> Self {
        Self {
            success: true,
            data,
            error: None,
            execution_time,
        }
    }

    pub fn failure(error: impl Into<String>, execution_time: f64) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            execution_time,
        }
    }
}

/// An executable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry name, e.g. `web_search`.
    fn name(&self) -> &str;

    /// One-line description shown to the planning LLM.
    fn description(&self) -> &str;

    /// Execute with a JSON input object.
    async fn execute(&self, input: Value) -> ToolResult;
}

/// Name-keyed registry of tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!(tool = %name, "registering tool");
        self.tools
            .write()
            .expect("registry lock poisoned")
            .insert(name, tool);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools
            .read()
            .expect("registry lock poisoned")
            .contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Tool names with their one-line descriptions, sorted by name.
    pub fn catalog(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .tools
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|t| (t.name().to_string(), t.description().to_string()))
            .collect();
        entries.sort();
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().expect("registry lock poisoned").is_empty()
    }

    /// Execute a tool by name; a missing tool is a failed `ToolResult`,
    /// never a panic.
    pub async fn execute(&self, name: &str, input: Value) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::failure(format!("tool not registered: {name}"), 0.0);
        };
        let started = Instant::now();
        let mut result = tool.execute(input).await;
        result.execution_time = started.elapsed().as_secs_f64();
        result
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Tool returning a fixed JSON payload, for tests.
    pub struct FixedTool {
        pub tool_name: String,
        pub tool_description: String,
        pub payload: Value,
        pub succeed: bool,
    }

    impl FixedTool {
        pub fn new(name: &str, payload: Value) -> Self {
            Self {
                tool_name: name.to_string(),
                tool_description: format!("{name} (fixed)"),
                payload,
                succeed: true,
            }
        }
    }

    #[async_trait]
    impl Tool for FixedTool {
        fn name(&self) -> &str {
            &self.tool_name
        }

        fn description(&self) -> &str {
            &self.tool_description
        }

        async fn execute(&self, _input: Value) -> ToolResult {
            if self.succeed {
                ToolResult::ok(self.payload.clone(), 0.0)
            } else {
                ToolResult::failure("fixed failure", 0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FixedTool;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_execute() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FixedTool::new("web_search", json!({"hits": 3}))));

        assert!(registry.has_tool("web_search"));
        let result = registry.execute("web_search", json!({"query": "rust"})).await;
        assert!(result.success);
        assert_eq!(result.data["hits"], 3);
    }

    #[tokio::test]
    async fn test_missing_tool_is_failure_not_panic() {
        let registry = ToolRegistry::new();
        let result = registry.execute("nope", json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not registered"));
    }

    #[test]
    fn test_catalog_sorted() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FixedTool::new("web_search", json!(null))));
        registry.register(Arc::new(FixedTool::new("idea_verification", json!(null))));

        let catalog = registry.catalog();
        assert_eq!(catalog[0].0, "idea_verification");
        assert_eq!(catalog[1].0, "web_search");
    }
}
