//! Temporal memory tools - search and context windows over the log

use async_trait::async_trait;
use memstore::{FtsKind, Store, StoreError};
use serde::Deserialize;
use serde_json::Value;

use crate::tools::{CallCtx, Tool, ToolError, ToolOutcome, parse_args};

fn outcome(result: Result<String, StoreError>) -> Result<ToolOutcome, ToolError> {
    match result {
        Ok(text) => Ok(ToolOutcome::success(text)),
        Err(e) if e.is_recoverable() => Ok(ToolOutcome::error(format!("Error: {e}"))),
        Err(e) => Err(ToolError::Exec(e.into())),
    }
}

// === memory_search ===

/// Full-text search across messages and distillations
pub struct MemorySearchTool {
    store: Store,
}

impl MemorySearchTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search the full conversation history and its distilled summaries; matches are marked >>>like this<<<"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "minimum": 1, "maximum": 50 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: SearchParams = parse_args(self.name(), &input)?;
        outcome(self.store.search_fts(&params.query, params.limit).map(|hits| {
            if hits.is_empty() {
                return "No matches in memory.".to_string();
            }
            hits.iter()
                .map(|hit| {
                    let kind = match hit.kind {
                        FtsKind::Message => "message",
                        FtsKind::Distillation => "summary",
                    };
                    format!("[{kind}] {}\n  {}", hit.id, hit.snippet)
                })
                .collect::<Vec<_>>()
                .join("\n")
        }))
    }
}

// === memory_context ===

/// Fetch a message with its surrounding records
pub struct MemoryContextTool {
    store: Store,
}

impl MemoryContextTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct ContextParams {
    id: String,
    #[serde(default = "default_window")]
    before: usize,
    #[serde(default = "default_window")]
    after: usize,
}

fn default_window() -> usize {
    3
}

#[async_trait]
impl Tool for MemoryContextTool {
    fn name(&self) -> &str {
        "memory_context"
    }

    fn description(&self) -> &str {
        "Fetch a message from history by id, with surrounding messages for context"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Message id, e.g. from memory_search" },
                "before": { "type": "integer", "minimum": 0, "maximum": 20 },
                "after": { "type": "integer", "minimum": 0, "maximum": 20 }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: ContextParams = parse_args(self.name(), &input)?;
        outcome(
            self.store
                .temporal()
                .get_with_context(&params.id, params.before, params.after)
                .map(|messages| {
                    messages
                        .iter()
                        .map(|m| {
                            let marker = if m.id == params.id { ">" } else { " " };
                            format!("{marker} [{}] {}: {}", m.id, m.kind, m.content)
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use memstore::MessageKind;
    use tempfile::tempdir;

    fn ctx() -> CallCtx {
        CallCtx::new("call_1", CancelToken::new())
    }

    #[tokio::test]
    async fn test_search_then_context() {
        let temp = tempdir().unwrap();
        let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();
        let log = store.temporal();

        log.append(MessageKind::User, "we chose the aurora codename").unwrap();
        log.append(MessageKind::Assistant, "noted, aurora it is").unwrap();

        let search = MemorySearchTool::new(store.clone());
        let out = search
            .execute(serde_json::json!({ "query": "aurora" }), &ctx())
            .await
            .unwrap();
        assert!(out.output.contains(">>>aurora<<<"));

        // Pull the id out of the first hit line: "[message] tm_... "
        let id = out
            .output
            .lines()
            .next()
            .unwrap()
            .trim_start_matches("[message] ")
            .to_string();

        let context = MemoryContextTool::new(store);
        let out = context
            .execute(serde_json::json!({ "id": id, "before": 1, "after": 1 }), &ctx())
            .await
            .unwrap();
        assert!(out.output.contains("aurora it is"));
        assert!(out.output.lines().any(|l| l.starts_with('>')));
    }

    #[tokio::test]
    async fn test_unknown_id_is_result_text() {
        let temp = tempdir().unwrap();
        let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();
        let context = MemoryContextTool::new(store);

        let out = context
            .execute(serde_json::json!({ "id": "tm_nope" }), &ctx())
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.output.contains("tm_nope"));
    }
}
