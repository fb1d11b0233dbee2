//! Tool registry and dispatch
//!
//! A mapping from name to tool; each tool captured its own dependencies at
//! construction. Dispatch never kills the turn: unknown names and schema
//! violations route through the internal `__invalid_tool_call__` repair
//! path, and executor failures surface as `Error: ...` result text.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::llm::{ToolCall, ToolSpec};
use crate::plugin::{PluginManager, ServerState};

use super::{CallCtx, Tool, ToolError, ToolOutcome};

/// Internal repair tool name reported back to the model
pub const INVALID_TOOL_CALL: &str = "__invalid_tool_call__";

/// Tools available to one loop
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    plugins: Option<Arc<PluginManager>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            plugins: None,
        }
    }

    /// Attach the plugin manager so dispatch can answer for tools whose
    /// server is still connecting
    pub fn with_plugins(mut self, plugins: Arc<PluginManager>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool = tool.name(), "registering tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn register_all(&mut self, tools: Vec<Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool advertisements for the provider
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|t| ToolSpec::new(t.name(), t.description(), t.input_schema()))
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// One-line-per-tool catalog for the system prompt
    pub fn catalog(&self) -> String {
        let mut lines: Vec<String> = self
            .tools
            .values()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect();
        lines.sort();
        lines.join("\n")
    }

    /// Dispatch one call. Always produces a tool result; never an error
    /// that would terminate the loop.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &CallCtx) -> ToolOutcome {
        let Some(tool) = self.tools.get(&call.name) else {
            return self.repair_unknown(call);
        };

        match tool.execute(call.args.clone(), ctx).await {
            Ok(outcome) => outcome,
            Err(ToolError::InvalidArgs(detail)) => {
                debug!(tool = %call.name, "schema violation redirected");
                ToolOutcome::error(detail).with_title(INVALID_TOOL_CALL)
            }
            Err(ToolError::Exec(e)) => {
                warn!(tool = %call.name, error = %e, "tool executor failed");
                ToolOutcome::error(format!("Error: {e}"))
            }
        }
    }

    /// Repair path for names with no registered executor
    fn repair_unknown(&self, call: &ToolCall) -> ToolOutcome {
        // A namespaced name may belong to a server that has not finished
        // connecting yet
        if let Some((server, _)) = call.name.split_once("__")
            && let Some(plugins) = &self.plugins
            && plugins.state(server) == Some(ServerState::Connecting)
        {
            return ToolOutcome::error(format!(
                "Tool {} is provided by server '{server}', which is still connecting. \
                 Retry shortly or proceed without it.",
                call.name
            ))
            .with_title(INVALID_TOOL_CALL);
        }

        let known = self.names().join(", ");
        ToolOutcome::error(format!(
            "You called unknown tool {}; no such tool is registered. Available tools: {known}",
            call.name
        ))
        .with_title(INVALID_TOOL_CALL)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::Value;

    struct EchoTool;

    #[derive(Deserialize)]
    struct EchoParams {
        text: String,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input text"
        }

        fn input_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
            let params: EchoParams = super::super::parse_args("echo", &input)?;
            Ok(ToolOutcome::success(params.text))
        }
    }

    struct ExplodingTool;

    #[async_trait]
    impl Tool for ExplodingTool {
        fn name(&self) -> &str {
            "explode"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn input_schema(&self) -> Value {
            serde_json::json!({ "type": "object" })
        }

        async fn execute(&self, _input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
            Err(ToolError::Exec(eyre::eyre!("disk on fire")))
        }
    }

    fn ctx() -> CallCtx {
        CallCtx::new("call_1", CancelToken::new())
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            args,
        }
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let outcome = registry
            .dispatch(&call("echo", serde_json::json!({ "text": "hi" })), &ctx())
            .await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.output, "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_redirects() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let outcome = registry.dispatch(&call("nonexistent", serde_json::json!({})), &ctx()).await;
        assert!(outcome.is_error);
        assert_eq!(outcome.title.as_deref(), Some(INVALID_TOOL_CALL));
        assert!(outcome.output.contains("unknown tool nonexistent"));
        assert!(outcome.output.contains("echo"));
    }

    #[tokio::test]
    async fn test_schema_violation_redirects() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let outcome = registry
            .dispatch(&call("echo", serde_json::json!({ "text": 42 })), &ctx())
            .await;
        assert!(outcome.is_error);
        assert_eq!(outcome.title.as_deref(), Some(INVALID_TOOL_CALL));
        assert!(outcome.output.contains("schema violation"));
    }

    #[tokio::test]
    async fn test_executor_failure_becomes_error_text() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ExplodingTool));

        let outcome = registry.dispatch(&call("explode", serde_json::json!({})), &ctx()).await;
        assert!(outcome.is_error);
        assert!(outcome.output.starts_with("Error:"));
        assert!(outcome.output.contains("disk on fire"));
        assert!(outcome.title.is_none());
    }

    #[tokio::test]
    async fn test_connecting_server_repair_message() {
        let plugins = Arc::new(PluginManager::new());
        plugins.mark_connecting("search");

        let registry = ToolRegistry::new().with_plugins(plugins);
        let outcome = registry
            .dispatch(&call("search__query", serde_json::json!({})), &ctx())
            .await;
        assert!(outcome.output.contains("still connecting"));
    }

    #[test]
    fn test_specs_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ExplodingTool));
        registry.register(Arc::new(EchoTool));

        let specs = registry.specs();
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[1].name, "explode");
    }
}
