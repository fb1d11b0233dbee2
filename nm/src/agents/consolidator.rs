//! Consolidator - curates the knowledge tree from recent conversation
//!
//! Triggered in the background after a noteworthy window. Reads the recent
//! messages, then creates and updates LTM entries so durable facts survive
//! distillation.

use std::sync::Arc;

use memstore::Store;

use crate::cancel::CancelToken;
use crate::distill::is_noteworthy;
use crate::events::EventBus;
use crate::llm::Provider;
use crate::tools::ToolRegistry;
use crate::tools::builtin::{FinishTool, ltm_tools};

use super::subagent::{SubAgentSpec, run_sub_agent};

const CONSOLIDATOR_PROMPT: &str = "\
You are the memory consolidator for a long-running agent. You receive a
window of recent conversation. Curate the agent's knowledge tree so the
durable facts in that window survive after the raw conversation is
compressed away.

Work with the ltm_* tools:
- ltm_glob and ltm_search to find where a fact belongs
- ltm_update or ltm_edit to extend existing entries (re-read on version
  conflict and retry once)
- ltm_create for genuinely new topics, under a sensible parent
- cross-link related entries with [[slug]] references

Record only durable knowledge: stable facts, preferences, decisions,
project structure. Skip transient chatter. When you are done, call
finish_consolidation with a short summary of what changed.";

/// How many recent messages the consolidator reads
const WINDOW: usize = 50;

/// Whether the recent window warrants consolidation
pub fn should_consolidate(store: &Store) -> eyre::Result<bool> {
    let recent = store.temporal().recent(WINDOW)?;
    Ok(is_noteworthy(&recent))
}

/// Run the consolidator over the recent window, returning its summary
pub async fn run_consolidation(
    store: Store,
    provider: Arc<dyn Provider>,
    bus: EventBus,
    model: &str,
    cancel: CancelToken,
) -> eyre::Result<String> {
    let recent = store.temporal().recent(WINDOW)?;
    let window = recent
        .iter()
        .map(|m| format!("[{}] {}", m.kind, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let mut registry = ToolRegistry::new();
    registry.register_all(ltm_tools(store.clone(), bus, "consolidator"));
    registry.register(Arc::new(FinishTool::finish_consolidation()));

    let spec = SubAgentSpec {
        agent_type: "consolidator",
        task_prompt: CONSOLIDATOR_PROMPT.to_string(),
        registry,
        max_turns: 10,
        finish_tool: "finish_consolidation",
        model: model.to_string(),
    };

    let input = format!("Recent conversation window:\n\n{window}");
    run_sub_agent(store, provider, spec, &input, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::scripted::ScriptedProvider;
    use memstore::MessageKind;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_quiet_window_not_consolidated() {
        let temp = tempdir().unwrap();
        let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();
        store.temporal().append(MessageKind::User, "hi").unwrap();
        assert!(!should_consolidate(&store).unwrap());
    }

    #[tokio::test]
    async fn test_consolidator_writes_entries() {
        let temp = tempdir().unwrap();
        let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();
        let log = store.temporal();
        for i in 0..4 {
            log.append(MessageKind::User, &format!("discussing deployment step {i}")).unwrap();
        }
        log.append(MessageKind::ToolCall, "{\"name\":\"fetch\"}").unwrap();
        assert!(should_consolidate(&store).unwrap());

        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedProvider::tool_response(
                "ltm_create",
                serde_json::json!({
                    "slug": "/knowledge/deploy",
                    "parent_slug": "/",
                    "title": "Deployment",
                    "body": "Deploys run in four steps."
                }),
            ),
            ScriptedProvider::tool_response(
                "finish_consolidation",
                serde_json::json!({ "summary": "captured deployment knowledge" }),
            ),
        ]));

        let summary = run_consolidation(
            store.clone(),
            provider,
            EventBus::with_default_capacity(),
            "claude-haiku-4-5",
            CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary, "captured deployment knowledge");
        let entry = store.ltm().read("/knowledge/deploy").unwrap();
        assert_eq!(entry.agent_type, "consolidator");
        // The sub-agent conversation stayed out of the temporal log
        assert_eq!(store.temporal().count().unwrap(), 5);
    }
}
