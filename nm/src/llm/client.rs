//! Provider trait
//!
//! The model is a black box that turns (system, messages, tools) into text
//! and tool calls. Each call is independent; the engine owns all
//! conversation state.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{GenerateRequest, GenerateResponse, ProviderError, StreamChunk};

/// A stateless text/tool-call generator
#[async_trait]
pub trait Provider: Send + Sync {
    /// One blocking completion. Honors the request's cancel token.
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError>;

    /// Streaming completion for interactive display. Chunks go to the
    /// channel as they arrive; the full response is returned at the end.
    async fn generate_stream(
        &self,
        request: GenerateRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<GenerateResponse, ProviderError>;
}
