//! Generic bounded sub-agent runner

use std::sync::Arc;

use memstore::Store;
use tracing::info;

use crate::cancel::CancelToken;
use crate::llm::Provider;
use crate::tools::ToolRegistry;
use crate::turn::{LoopMode, TurnConfig, TurnLoop, TurnObserver, TurnStop};

/// Everything that distinguishes one sub-agent family from another
pub struct SubAgentSpec {
    /// Audit tag recorded on LTM writes ("consolidator", "research", ...)
    pub agent_type: &'static str,
    /// The task system prompt
    pub task_prompt: String,
    /// Restricted tool set, including the finish tool
    pub registry: ToolRegistry,
    /// Iteration cap
    pub max_turns: u32,
    /// Tool whose call ends the run and carries the payload
    pub finish_tool: &'static str,
    /// Model id for the output-token heuristic
    pub model: String,
}

/// Run a sub-agent to completion, returning its final payload. A run that
/// exhausts its turn cap without calling the finish tool returns whatever
/// text it last produced.
pub async fn run_sub_agent(
    store: Store,
    provider: Arc<dyn Provider>,
    spec: SubAgentSpec,
    input: &str,
    cancel: CancelToken,
) -> eyre::Result<String> {
    let mut turn_loop = TurnLoop {
        provider,
        registry: Arc::new(spec.registry),
        store,
        bus: None,
        cancel,
        config: TurnConfig {
            max_turns: spec.max_turns,
            temperature: 1.0,
            model: spec.model,
            finish_tool: Some(spec.finish_tool.to_string()),
        },
        mode: LoopMode::Sub {
            task_prompt: spec.task_prompt,
        },
    };

    let mut observer = TurnObserver::default();
    let result = turn_loop.run_turn(input, None, &mut observer).await?;
    info!(
        agent_type = spec.agent_type,
        stop_reason = %result.stop_reason,
        num_turns = result.num_turns,
        "sub-agent finished"
    );

    if result.stop_reason == TurnStop::Cancelled {
        return Err(eyre::eyre!("{} sub-agent cancelled", spec.agent_type));
    }
    Ok(result.text)
}
