//! Engine-level integration: session over a real store with a stub provider

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nuum::config::Config;
use nuum::llm::{GenerateRequest, GenerateResponse, Provider, ProviderError, StopReason, StreamChunk, Usage};
use nuum::session::Session;
use nuum::turn::{TurnObserver, TurnStop};
use tempfile::tempdir;
use tokio::sync::mpsc;

/// Always answers with the same text and ends the turn
struct StaticProvider(&'static str);

#[async_trait]
impl Provider for StaticProvider {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        if request.cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        Ok(GenerateResponse {
            text: Some(self.0.to_string()),
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            usage: Usage {
                prompt_tokens: 20,
                completion_tokens: 10,
                ..Usage::default()
            },
            provider_metadata: serde_json::Value::Null,
        })
    }

    async fn generate_stream(
        &self,
        request: GenerateRequest,
        _chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<GenerateResponse, ProviderError> {
        self.generate(request).await
    }
}

fn config_for(temp: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.store.path = Some(temp.path().join("agent.db"));
    config.store.lock_timeout_ms = 500;
    config
}

#[tokio::test]
async fn prompts_accumulate_in_the_log_across_sessions() {
    let temp = tempdir().unwrap();

    let session_id = {
        let mut session = Session::with_providers(
            config_for(&temp),
            Arc::new(StaticProvider("first answer")),
            Arc::new(StaticProvider("unused")),
        )
        .await
        .unwrap();

        let mut observer = TurnObserver::default();
        let result = session.run_prompt("hello", &mut observer).await.unwrap();
        assert_eq!(result.stop_reason, TurnStop::NoToolCalls);
        assert_eq!(result.text, "first answer");
        session.session_id().to_string()
    };

    // Reopen: same session id, history intact, and the next turn sees it
    let mut session = Session::with_providers(
        config_for(&temp),
        Arc::new(StaticProvider("second answer")),
        Arc::new(StaticProvider("unused")),
    )
    .await
    .unwrap();
    assert_eq!(session.session_id(), session_id);
    assert_eq!(session.store().temporal().count().unwrap(), 2);

    let mut observer = TurnObserver::default();
    session.run_prompt("again", &mut observer).await.unwrap();
    assert_eq!(session.store().temporal().count().unwrap(), 4);
}

#[tokio::test]
async fn second_writer_session_is_locked_out() {
    let temp = tempdir().unwrap();

    let _held = Session::with_providers(
        config_for(&temp),
        Arc::new(StaticProvider("a")),
        Arc::new(StaticProvider("b")),
    )
    .await
    .unwrap();

    let contender = Session::with_providers(
        config_for(&temp),
        Arc::new(StaticProvider("a")),
        Arc::new(StaticProvider("b")),
    )
    .await;
    assert!(contender.is_err(), "second writer must fail to open");
}

#[tokio::test]
async fn interrupt_mid_turn_yields_cancelled() {
    /// Hangs until cancelled
    struct Hang;

    #[async_trait]
    impl Provider for Hang {
        async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
            request.cancel.cancelled().await;
            Err(ProviderError::Cancelled)
        }

        async fn generate_stream(
            &self,
            request: GenerateRequest,
            _chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<GenerateResponse, ProviderError> {
            self.generate(request).await
        }
    }

    let temp = tempdir().unwrap();
    let mut session = Session::with_providers(
        config_for(&temp),
        Arc::new(Hang),
        Arc::new(StaticProvider("unused")),
    )
    .await
    .unwrap();

    let interrupt = session.interrupt_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        interrupt.interrupt();
    });

    let mut observer = TurnObserver::default();
    let result = session.run_prompt("never finishes", &mut observer).await.unwrap();
    canceller.await.unwrap();

    assert_eq!(result.stop_reason, TurnStop::Cancelled);
    // The cancelled turn's user message survives (no rollback)
    assert_eq!(session.store().temporal().count().unwrap(), 1);
}
