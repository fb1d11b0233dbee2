//! Tool trait and call context

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::cancel::CancelToken;

/// Host-supplied permission hook. The default engine allows everything;
/// embedding hosts can impose policy here.
pub type PermissionHook = Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>;

/// Per-call execution context. Tools capture their durable dependencies
/// (store handles, scheduler) at construction; only call-scoped values
/// travel here.
#[derive(Clone)]
pub struct CallCtx {
    /// Provider-assigned tool call id
    pub call_id: String,
    /// Cooperative abort signal
    pub cancel: CancelToken,
    /// Permission query hook (allow-all by default)
    pub permission: PermissionHook,
}

impl CallCtx {
    pub fn new(call_id: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            call_id: call_id.into(),
            cancel,
            permission: Arc::new(|_, _| true),
        }
    }

    pub fn with_permission(mut self, hook: PermissionHook) -> Self {
        self.permission = hook;
        self
    }
}

impl std::fmt::Debug for CallCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCtx").field("call_id", &self.call_id).finish()
    }
}

/// Why a tool invocation could not produce a normal outcome
#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments did not match the tool's schema; redirected to the
    /// invalid-call repair path rather than raised
    #[error("{0}")]
    InvalidArgs(String),

    /// The executor itself failed; wrapped into `Error: ...` result text
    #[error(transparent)]
    Exec(#[from] eyre::Report),
}

/// Result of a tool execution, fed back to the model as a tool result
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub output: String,
    pub is_error: bool,
    pub title: Option<String>,
    /// Structured extras for hosts (ignored by the model path)
    pub metadata: Option<Value>,
}

impl ToolOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
            title: None,
            metadata: None,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
            title: None,
            metadata: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A tool callable by the model
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name advertised to the model (plugin tools carry namespaced names)
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the arguments, for tool advertising; runtime
    /// validation happens by parsing into the typed params struct
    fn input_schema(&self) -> Value;

    async fn execute(&self, input: Value, ctx: &CallCtx) -> Result<ToolOutcome, ToolError>;
}

/// Parse tool arguments into their typed form. A mismatch produces the
/// detailed schema-violation message the repair path feeds back to the
/// model.
pub fn parse_args<T: DeserializeOwned>(tool: &str, input: &Value) -> Result<T, ToolError> {
    serde_json::from_value(input.clone()).map_err(|e| {
        ToolError::InvalidArgs(format!(
            "You provided {input} for tool {tool}; schema violation: {e}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Params {
        slug: String,
        #[serde(default)]
        limit: Option<u32>,
    }

    #[test]
    fn test_parse_args_ok() {
        let input = serde_json::json!({ "slug": "/identity", "limit": 5 });
        let params: Params = parse_args("ltm_read", &input).unwrap();
        assert_eq!(params.slug, "/identity");
        assert_eq!(params.limit, Some(5));
    }

    #[test]
    fn test_parse_args_violation_names_tool() {
        let input = serde_json::json!({ "limit": "not a number" });
        let err = parse_args::<Params>("ltm_read", &input).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("ltm_read"));
        assert!(text.contains("schema violation"));
    }
}
