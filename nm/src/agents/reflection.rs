//! Reflection sub-agent - answers questions from stored history

use std::sync::Arc;

use memstore::Store;

use crate::cancel::CancelToken;
use crate::events::EventBus;
use crate::llm::Provider;
use crate::tools::ToolRegistry;
use crate::tools::builtin::{FinishTool, MemoryContextTool, MemorySearchTool, ltm_read_tools};

use super::subagent::{SubAgentSpec, run_sub_agent};

const REFLECTION_PROMPT: &str = "\
You are a reflection sub-agent. Answer the focus question from the agent's
own memory: memory_search and memory_context over the full conversation
history, and the read-only ltm_* tools over the knowledge tree. Quote
specific messages and entries rather than speculating; say plainly when the
record does not contain an answer. Call finish_reflection with your answer
when done.";

/// Run a reflection task, returning the answer
pub async fn run_reflection(
    store: Store,
    provider: Arc<dyn Provider>,
    bus: EventBus,
    model: &str,
    focus: &str,
    cancel: CancelToken,
) -> eyre::Result<String> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(MemorySearchTool::new(store.clone())));
    registry.register(Arc::new(MemoryContextTool::new(store.clone())));
    registry.register_all(ltm_read_tools(store.clone(), bus, "reflection"));
    registry.register(Arc::new(FinishTool::finish_reflection()));

    let spec = SubAgentSpec {
        agent_type: "reflection",
        task_prompt: REFLECTION_PROMPT.to_string(),
        registry,
        max_turns: 20,
        finish_tool: "finish_reflection",
        model: model.to_string(),
    };

    run_sub_agent(store, provider, spec, focus, cancel).await
}
