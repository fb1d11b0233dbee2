//! Distiller - keeps the temporal log's working set bounded
//!
//! When the uncompressed tail outgrows its threshold, the oldest batch of
//! raw messages is rewritten into one level-1 distillation. When enough
//! adjacent same-level distillations accumulate, they compose into one
//! record a level higher. Sources are never deleted.
//!
//! The provider call happens outside the store write mutex; the write
//! re-checks that the tail has not moved before committing.

use std::sync::Arc;

use memstore::{Store, TemporalMessage};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::events::{Event, EventBus};
use crate::llm::{GenerateRequest, Message, Provider, SystemBlock};
use crate::tokens::estimate_message;

/// Worker kind recorded for crash detection
pub const DISTILLER_WORKER: &str = "distiller";

/// Instruction passed verbatim to the provider
const DISTILL_PROMPT: &str = "\
You compress conversation history into a compact intelligence record.

RETAIN, with exact wording where it matters:
- file paths, URLs, identifiers, configuration values, and other literals
- decisions made and the rationale behind them
- corrections the user made to earlier assumptions
- how errors were diagnosed and resolved

EXCISE entirely:
- dead-end debugging and intermediate missteps
- verbose tool output
- narrative filler and acknowledgments

Write one dense summary. No preamble, no commentary about the task.";

/// Prompt for composing lower-level distillations into a higher one
const COMPOSE_PROMPT: &str = "\
You merge several sequential summaries of a conversation into one
higher-level summary. Preserve literals, decisions with rationale, user
corrections, and error resolutions; drop anything redundant between the
inputs. Write one dense summary. No preamble.";

/// Distillation tuning
#[derive(Debug, Clone)]
pub struct DistillConfig {
    /// Uncompressed-tail token count that triggers a run
    pub threshold_tokens: usize,
    /// Raw messages per level-1 batch
    pub batch: usize,
    /// Adjacent same-level records composed into the next level
    pub compose: usize,
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            threshold_tokens: 80_000,
            batch: 40,
            compose: 4,
        }
    }
}

/// The distillation worker
pub struct Distiller {
    store: Store,
    provider: Arc<dyn Provider>,
    bus: EventBus,
    config: DistillConfig,
}

impl Distiller {
    pub fn new(store: Store, provider: Arc<dyn Provider>, bus: EventBus, config: DistillConfig) -> Self {
        Self {
            store,
            provider,
            bus,
            config,
        }
    }

    /// Whether the uncompressed tail has outgrown the threshold
    pub fn should_distill(&self) -> eyre::Result<bool> {
        let tail = self.store.temporal().uncompressed_tail()?;
        let tokens: usize = tail.iter().map(|m| estimate_message(&m.content)).sum();
        Ok(tokens > self.config.threshold_tokens && tail.len() >= self.config.batch)
    }

    /// Run one distillation pass if warranted. Only one distiller may run
    /// per database; a second call while one is running is a no-op.
    pub async fn run_if_needed(&self, cancel: CancelToken) -> eyre::Result<bool> {
        if !self.should_distill()? && !self.compose_ready()? {
            return Ok(false);
        }
        if self.store.workers().is_running(DISTILLER_WORKER)? {
            debug!("distiller already running; skipping");
            return Ok(false);
        }

        let worker_id = self.store.workers().start(DISTILLER_WORKER)?;
        let result = self.run_pass(cancel).await;
        match &result {
            Ok(_) => self.store.workers().finish(&worker_id)?,
            Err(e) => self.store.workers().fail(&worker_id, &e.to_string())?,
        }
        let ok = result.is_ok();
        self.bus.emit(Event::WorkerFinished {
            kind: DISTILLER_WORKER.to_string(),
            ok,
        });
        result.map(|_| true)
    }

    async fn run_pass(&self, cancel: CancelToken) -> eyre::Result<()> {
        if self.should_distill()? {
            self.distill_level_one(cancel.clone()).await?;
        }
        while self.compose_ready()? {
            if cancel.is_cancelled() {
                break;
            }
            self.compose_next_level(cancel.clone()).await?;
        }
        Ok(())
    }

    /// Rewrite the oldest batch of uncompressed messages into one level-1
    /// distillation
    async fn distill_level_one(&self, cancel: CancelToken) -> eyre::Result<()> {
        let tail = self.store.temporal().uncompressed_tail()?;
        let batch: Vec<TemporalMessage> = tail.into_iter().take(self.config.batch).collect();
        let Some(first) = batch.first() else {
            return Ok(());
        };
        let last = batch.last().expect("non-empty batch has a last element");
        let (start_id, end_id) = (first.id.clone(), last.id.clone());

        let transcript = batch
            .iter()
            .map(|m| format!("[{}] {}", m.kind, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        // Provider call happens before any lock is taken
        let body = self.summarize(DISTILL_PROMPT, &transcript, cancel).await?;

        let _guard = self.store.write_lock().await;
        // The tail may have been distilled by a competing process while we
        // were summarizing; the range check makes the write safe to skip
        let current = self.store.temporal().uncompressed_tail()?;
        if current.first().map(|m| m.id.as_str()) != Some(start_id.as_str()) {
            warn!("tail moved during distillation; discarding result");
            return Ok(());
        }

        let id = self.store.temporal().insert_distillation(1, &start_id, &end_id, &body)?;
        info!(%id, covered = batch.len(), "level-1 distillation written");
        self.bus.emit(Event::DistillationCreated { id, level: 1 });
        Ok(())
    }

    /// Whether some level has enough adjacent records to compose
    fn compose_ready(&self) -> eyre::Result<bool> {
        let max_level = self.store.temporal().max_level()?;
        for level in 1..=max_level {
            if self.composable_run(level)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The first `compose`-sized run of adjacent level-`level` records not
    /// yet covered by a higher level
    fn composable_run(&self, level: u32) -> eyre::Result<Option<Vec<memstore::Distillation>>> {
        let at_level = self.store.temporal().distillations_at(level)?;
        let above = self.store.temporal().distillations_at(level + 1)?;
        let covered_end = above.last().map(|d| d.range_end_id.clone());

        let uncovered: Vec<memstore::Distillation> = at_level
            .into_iter()
            .filter(|d| {
                covered_end
                    .as_deref()
                    .map(|end| d.range_start_id.as_str() > end)
                    .unwrap_or(true)
            })
            .collect();

        if uncovered.len() >= self.config.compose {
            Ok(Some(uncovered.into_iter().take(self.config.compose).collect()))
        } else {
            Ok(None)
        }
    }

    async fn compose_next_level(&self, cancel: CancelToken) -> eyre::Result<()> {
        let max_level = self.store.temporal().max_level()?;
        for level in 1..=max_level {
            let Some(run) = self.composable_run(level)? else {
                continue;
            };

            let start_id = run.first().expect("run is non-empty").range_start_id.clone();
            let end_id = run.last().expect("run is non-empty").range_end_id.clone();
            let joined = run
                .iter()
                .enumerate()
                .map(|(i, d)| format!("--- summary {} ---\n{}", i + 1, d.body))
                .collect::<Vec<_>>()
                .join("\n\n");

            let body = self.summarize(COMPOSE_PROMPT, &joined, cancel).await?;

            let _guard = self.store.write_lock().await;
            let id = self
                .store
                .temporal()
                .insert_distillation(level + 1, &start_id, &end_id, &body)?;
            info!(%id, level = level + 1, composed = run.len(), "composed distillation written");
            self.bus.emit(Event::DistillationCreated { id, level: level + 1 });
            return Ok(());
        }
        Ok(())
    }

    async fn summarize(&self, prompt: &str, input: &str, cancel: CancelToken) -> eyre::Result<String> {
        let request = GenerateRequest {
            system: vec![SystemBlock::plain(prompt)],
            messages: vec![Message::user(input)],
            tools: vec![],
            max_output_tokens: 4_096,
            temperature: 0.3,
            cancel,
        };
        let response = self.provider.generate(request).await?;
        response
            .text
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| eyre::eyre!("distillation produced no text"))
    }
}

/// A conversation window worth distilling or consolidating: at least five
/// messages, with tool activity or some substantial content
pub fn is_noteworthy(messages: &[TemporalMessage]) -> bool {
    messages.len() >= 5
        && messages
            .iter()
            .any(|m| m.kind.is_tool() || m.content.chars().count() > 200)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::scripted::ScriptedProvider;
    use memstore::MessageKind;
    use tempfile::tempdir;

    async fn open_store() -> (tempfile::TempDir, Store) {
        let temp = tempdir().unwrap();
        let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();
        (temp, store)
    }

    fn distiller(store: &Store, provider: Arc<dyn Provider>, threshold: usize, batch: usize) -> Distiller {
        Distiller::new(
            store.clone(),
            provider,
            EventBus::with_default_capacity(),
            DistillConfig {
                threshold_tokens: threshold,
                batch,
                compose: 4,
            },
        )
    }

    fn fill(store: &Store, n: usize) -> Vec<String> {
        let log = store.temporal();
        (0..n)
            .map(|i| {
                log.append(
                    MessageKind::User,
                    &format!("message {i} carrying enough words to count for the estimator"),
                )
                .unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_no_trigger_below_threshold() {
        let (_temp, store) = open_store().await;
        fill(&store, 5);

        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let d = distiller(&store, provider, 1_000_000, 4);
        assert!(!d.should_distill().unwrap());
        assert!(!d.run_if_needed(CancelToken::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_level_one_covers_oldest_batch() {
        let (_temp, store) = open_store().await;
        let ids = fill(&store, 10);

        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedProvider::text_response(
            "compact summary of the batch",
        )]));
        let d = distiller(&store, provider, 10, 6);

        assert!(d.run_if_needed(CancelToken::new()).await.unwrap());

        let level1 = store.temporal().distillations_at(1).unwrap();
        assert_eq!(level1.len(), 1);
        assert_eq!(level1[0].range_start_id, ids[0]);
        assert_eq!(level1[0].range_end_id, ids[5]);
        assert_eq!(level1[0].body, "compact summary of the batch");

        // Sources are retained
        assert_eq!(store.temporal().count().unwrap(), 10);
    }

    #[tokio::test]
    async fn test_composition_builds_level_two() {
        let (_temp, store) = open_store().await;
        let ids = fill(&store, 20);

        // Pre-seed four adjacent level-1 records covering the first 16
        let log = store.temporal();
        for i in 0..4 {
            log.insert_distillation(1, &ids[i * 4], &ids[i * 4 + 3], &format!("batch {i}"))
                .unwrap();
        }

        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedProvider::text_response(
            "merged higher-order summary",
        )]));
        // Threshold high so only composition runs
        let d = distiller(&store, provider, 1_000_000, 4);
        assert!(d.run_if_needed(CancelToken::new()).await.unwrap());

        let level2 = store.temporal().distillations_at(2).unwrap();
        assert_eq!(level2.len(), 1);
        assert_eq!(level2[0].range_start_id, ids[0]);
        assert_eq!(level2[0].range_end_id, ids[15]);
        assert_eq!(level2[0].body, "merged higher-order summary");
    }

    #[tokio::test]
    async fn test_second_distiller_skips_while_running() {
        let (_temp, store) = open_store().await;
        fill(&store, 10);

        // Simulate a distiller that is already running
        store.workers().start(DISTILLER_WORKER).unwrap();

        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedProvider::text_response("s")]));
        let d = distiller(&store, provider, 10, 6);
        assert!(!d.run_if_needed(CancelToken::new()).await.unwrap());
        assert!(store.temporal().distillations_at(1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_long_history_bounds_tail() {
        let (_temp, store) = open_store().await;
        // 200 messages, each ≥ 10 tokens
        let log = store.temporal();
        for i in 0..200 {
            log.append(
                MessageKind::User,
                &format!("message number {i} padded with quite a few additional filler words here"),
            )
            .unwrap();
        }

        // Every pass produces a summary; loop until the tail fits
        let responses: Vec<_> = (0..10)
            .map(|i| ScriptedProvider::text_response(&format!("summary {i}")))
            .collect();
        let provider = Arc::new(ScriptedProvider::new(responses));
        let d = distiller(&store, provider, 1_000, 40);

        for _ in 0..6 {
            if !d.run_if_needed(CancelToken::new()).await.unwrap() {
                break;
            }
        }

        assert!(!store.temporal().distillations_at(1).unwrap().is_empty());
        let tail = store.temporal().uncompressed_tail().unwrap();
        let tail_tokens: usize = tail.iter().map(|m| estimate_message(&m.content)).sum();
        assert!(tail_tokens <= 1_000, "tail still {tail_tokens} tokens");
    }

    #[test]
    fn test_noteworthy_heuristic() {
        let msg = |kind, content: &str| TemporalMessage {
            id: "tm_x".to_string(),
            kind,
            content: content.to_string(),
            created_at: 0,
        };

        // Too short
        assert!(!is_noteworthy(&[msg(MessageKind::User, "hi")]));

        // Five messages but all trivial
        let trivial: Vec<_> = (0..5).map(|_| msg(MessageKind::User, "ok")).collect();
        assert!(!is_noteworthy(&trivial));

        // Tool activity qualifies
        let mut with_tool = trivial.clone();
        with_tool[2] = msg(MessageKind::ToolCall, "{}");
        assert!(is_noteworthy(&with_tool));

        // Long content qualifies
        let mut with_long = trivial;
        with_long[4] = msg(MessageKind::User, &"x".repeat(250));
        assert!(is_noteworthy(&with_long));
    }
}
