//! LLM provider layer
//!
//! The engine talks to models through the [`Provider`] trait; the Anthropic
//! Messages API implementation lives in [`anthropic`].

use std::sync::Arc;
use std::time::Duration;

mod anthropic;
pub mod client;
mod error;
mod types;

pub use anthropic::AnthropicProvider;
pub use client::Provider;
pub use error::ProviderError;
pub use types::{
    ContentBlock, GenerateRequest, GenerateResponse, Message, MessageContent, Role, StopReason,
    StreamChunk, SystemBlock, ToolCall, ToolSpec, Usage, max_output_tokens_for,
};

use crate::config::ProviderConfig;

/// Model tiers the engine picks between: deep reasoning, the default
/// workhorse, and a fast/cheap tier for distillation and sub-agents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Reasoning,
    Workhorse,
    Fast,
}

/// Create a provider for the given tier from config
pub fn create_provider(
    config: &ProviderConfig,
    tier: ModelTier,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let model = match tier {
        ModelTier::Reasoning => &config.models.reasoning,
        ModelTier::Workhorse => &config.models.workhorse,
        ModelTier::Fast => &config.models.fast,
    };
    let provider = AnthropicProvider::new(
        model,
        &config.base_url,
        &config.api_key_env,
        Duration::from_millis(config.timeout_ms),
    )?;
    Ok(Arc::new(provider))
}
