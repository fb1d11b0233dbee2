//! Research sub-agent - investigates a question with web and file access

use std::path::PathBuf;
use std::sync::Arc;

use memstore::Store;

use crate::cancel::CancelToken;
use crate::events::EventBus;
use crate::llm::Provider;
use crate::tools::ToolRegistry;
use crate::tools::builtin::{FetchTool, FinishTool, ReadFileTool, ltm_tools};

use super::subagent::{SubAgentSpec, run_sub_agent};

const RESEARCH_PROMPT: &str = "\
You are a research sub-agent. Investigate the question you are given using
fetch for web content and read_file for local files. Store durable findings
in the knowledge tree with the ltm_* tools so they outlive this run, citing
sources by URL inside entry bodies.

Be thorough but bounded: stop digging once additional sources repeat what
you already know. When finished, call finish_research with a report that
answers the question and lists the entries you touched.";

/// Run a research task, returning the report
pub async fn run_research(
    store: Store,
    provider: Arc<dyn Provider>,
    bus: EventBus,
    model: &str,
    question: &str,
    file_root: PathBuf,
    cancel: CancelToken,
) -> eyre::Result<String> {
    let mut registry = ToolRegistry::new();
    registry.register_all(ltm_tools(store.clone(), bus, "research"));
    registry.register(Arc::new(FetchTool::new()));
    registry.register(Arc::new(ReadFileTool::new(file_root)));
    registry.register(Arc::new(FinishTool::finish_research()));

    let spec = SubAgentSpec {
        agent_type: "research",
        task_prompt: RESEARCH_PROMPT.to_string(),
        registry,
        max_turns: 50,
        finish_tool: "finish_research",
        model: model.to_string(),
    };

    run_sub_agent(store, provider, spec, question, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::scripted::ScriptedProvider;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_research_returns_report() {
        let temp = tempdir().unwrap();
        let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();

        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedProvider::tool_response(
                "finish_research",
                serde_json::json!({ "report": "the answer is 42" }),
            ),
        ]));

        let report = run_research(
            store,
            provider,
            EventBus::with_default_capacity(),
            "claude-haiku-4-5",
            "what is the answer?",
            temp.path().to_path_buf(),
            CancelToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(report, "the answer is 42");
    }
}
