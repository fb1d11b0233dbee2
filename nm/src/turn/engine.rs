//! Turn loop engine
//!
//! One `run_turn` call processes one user prompt: assemble context, call
//! the provider, dispatch tools, record everything in the temporal log,
//! repeat until a stop condition. The loop is also the sub-agent engine:
//! `LoopMode::Sub` swaps the assembled context for a fixed task prompt and
//! keeps the conversation out of the temporal log.
//!
//! The loop never holds the store write mutex across a provider call;
//! every append is its own short write.

use std::sync::Arc;

use memstore::{MessageKind, Store};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::context::ContextAssembler;
use crate::events::{Event, EventBus};
use crate::llm::{
    ContentBlock, GenerateRequest, Message, Provider, ProviderError, StopReason, SystemBlock,
    Usage, max_output_tokens_for,
};
use crate::tools::{CallCtx, ToolRegistry};

use super::inject::InjectionRx;
use super::observer::TurnObserver;

/// Why a turn stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStop {
    /// The designated finish tool was called
    Done,
    /// The model produced no tool calls and nothing was pending
    NoToolCalls,
    /// The iteration cap was reached
    MaxTurns,
    /// The cooperative cancel signal fired
    Cancelled,
}

impl TurnStop {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStop::Done => "done",
            TurnStop::NoToolCalls => "no_tool_calls",
            TurnStop::MaxTurns => "max_turns",
            TurnStop::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TurnStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one prompt's worth of iterations
#[derive(Debug)]
pub struct TurnResult {
    /// Final assistant text (the finish tool's payload when stopped by it)
    pub text: String,
    pub stop_reason: TurnStop,
    pub usage: Usage,
    pub num_turns: u32,
    /// The assembler could not fit even the most compressed view; the
    /// caller should schedule distillation
    pub needs_escalation: bool,
}

/// Loop tuning
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub max_turns: u32,
    pub temperature: f32,
    /// Model id, for the max-output-token heuristic
    pub model: String,
    /// Tool that terminates the loop and carries the final payload
    pub finish_tool: Option<String>,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            temperature: 1.0,
            model: String::new(),
            finish_tool: Some("finish_turn".to_string()),
        }
    }
}

/// Where the loop gets its context and whether it records history
pub enum LoopMode {
    /// Main agent: context assembled from the store, every message
    /// recorded in the temporal log
    Main { assembler: ContextAssembler },
    /// Sub-agent: fixed task prompt, ephemeral conversation
    Sub { task_prompt: String },
}

/// The iterative model-call / tool-dispatch loop
pub struct TurnLoop {
    pub provider: Arc<dyn Provider>,
    pub registry: Arc<ToolRegistry>,
    pub store: Store,
    pub bus: Option<EventBus>,
    pub cancel: CancelToken,
    pub config: TurnConfig,
    pub mode: LoopMode,
}

impl TurnLoop {
    /// Run one prompt to completion
    pub async fn run_turn(
        &mut self,
        user_input: &str,
        mut injections: Option<&mut InjectionRx>,
        observer: &mut TurnObserver,
    ) -> eyre::Result<TurnResult> {
        // Background reports that arrived between turns go into the system
        // frame; anything else queued is plain injected user content
        let mut reports = Vec::new();
        let mut carried_injections = Vec::new();
        if let Some(rx) = injections.as_deref_mut() {
            for text in rx.try_drain() {
                if text.starts_with("[background") {
                    reports.push(text);
                } else {
                    carried_injections.push(text);
                }
            }
        }

        // History is snapshotted before this turn's records land
        let (system, history, needs_escalation) = self.build_context(&reports)?;

        self.emit(Event::TurnStarted);
        self.record(MessageKind::User, user_input);

        let mut turn_messages = vec![Message::user(user_input)];
        for text in carried_injections {
            self.record(MessageKind::User, &text);
            turn_messages.push(Message::user(text));
        }

        let max_output_tokens = max_output_tokens_for(&self.config.model);
        let mut usage = Usage::default();
        let mut num_turns: u32 = 0;
        let mut final_text = String::new();
        let stop_reason;

        loop {
            // Cooperative cancellation, checked at the top of every
            // iteration
            if self.cancel.is_cancelled() {
                stop_reason = TurnStop::Cancelled;
                break;
            }
            if num_turns >= self.config.max_turns {
                warn!(max_turns = self.config.max_turns, "turn iteration cap reached");
                stop_reason = TurnStop::MaxTurns;
                break;
            }
            num_turns += 1;

            // Host hook, then the injection queue, both ahead of the
            // provider call
            if let Some(extra) = observer.before_turn() {
                self.record(MessageKind::User, &extra);
                turn_messages.push(Message::user(extra));
            }
            if let Some(rx) = injections.as_deref_mut() {
                for text in rx.try_drain() {
                    self.record(MessageKind::User, &text);
                    turn_messages.push(Message::user(text));
                }
            }

            if num_turns > 1 {
                observer.thinking();
            }

            let mut messages = history.clone();
            messages.extend(turn_messages.iter().cloned());

            let request = GenerateRequest {
                system: system.clone(),
                messages,
                tools: self.registry.specs(),
                max_output_tokens,
                temperature: self.config.temperature,
                cancel: self.cancel.clone(),
            };

            let response = match self.provider.generate(request).await {
                Ok(response) => response,
                Err(ProviderError::Cancelled) => {
                    stop_reason = TurnStop::Cancelled;
                    break;
                }
                Err(e) => {
                    // Partial writes stay; the host sees the error
                    self.emit(Event::TurnCompleted {
                        stop_reason: "error".to_string(),
                        num_turns,
                    });
                    return Err(e.into());
                }
            };

            usage.add(&response.usage);
            info!(
                iteration = num_turns,
                prompt = response.usage.prompt_tokens,
                completion = response.usage.completion_tokens,
                cache_hit_rate = response.usage.cache_hit_rate(),
                "provider call complete"
            );

            // Record the assistant's output
            let mut assistant_blocks = Vec::new();
            if let Some(text) = &response.text {
                self.record(MessageKind::Assistant, text);
                observer.assistant_text(text);
                final_text = text.clone();
                assistant_blocks.push(ContentBlock::text(text));
            }
            for call in &response.tool_calls {
                let record = serde_json::json!({
                    "id": call.id, "name": call.name, "args": call.args,
                });
                self.record(MessageKind::ToolCall, &record.to_string());
                assistant_blocks.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.args.clone(),
                });
            }
            if !assistant_blocks.is_empty() {
                turn_messages.push(Message::assistant_blocks(assistant_blocks));
            }

            if response.tool_calls.is_empty() {
                if response.stop_reason == StopReason::MaxTokens {
                    debug!("output truncated at max tokens; asking to continue");
                    let nudge = "Continue from where you left off. Your previous response was truncated.";
                    self.record(MessageKind::User, nudge);
                    turn_messages.push(Message::user(nudge));
                    continue;
                }

                // Pending injections keep the turn alive
                let pending = injections
                    .as_deref_mut()
                    .map(|rx| rx.try_drain())
                    .unwrap_or_default();
                if pending.is_empty() {
                    stop_reason = TurnStop::NoToolCalls;
                    break;
                }
                for text in pending {
                    self.record(MessageKind::User, &text);
                    turn_messages.push(Message::user(text));
                }
                continue;
            }

            // Dispatch tools; failures become result text, never loop exits
            let mut result_blocks = Vec::new();
            let mut finish_payload: Option<String> = None;
            for call in &response.tool_calls {
                let ctx = CallCtx::new(call.id.clone(), self.cancel.clone());
                let outcome = self.registry.dispatch(call, &ctx).await;
                debug!(tool = %call.name, is_error = outcome.is_error, "tool dispatched");

                self.record(MessageKind::ToolResult, &outcome.output);
                observer.tool_result(&call.name, &outcome);
                result_blocks.push(ContentBlock::tool_result(
                    call.id.clone(),
                    outcome.output.clone(),
                    outcome.is_error,
                ));

                if !outcome.is_error
                    && self.config.finish_tool.as_deref() == Some(call.name.as_str())
                {
                    finish_payload = Some(outcome.output);
                }
            }
            turn_messages.push(Message::user_blocks(result_blocks));

            if let Some(payload) = finish_payload {
                final_text = payload;
                stop_reason = TurnStop::Done;
                break;
            }
        }

        self.emit(Event::TurnCompleted {
            stop_reason: stop_reason.as_str().to_string(),
            num_turns,
        });

        Ok(TurnResult {
            text: final_text,
            stop_reason,
            usage,
            num_turns,
            needs_escalation,
        })
    }

    fn build_context(
        &self,
        reports: &[String],
    ) -> eyre::Result<(Vec<SystemBlock>, Vec<Message>, bool)> {
        match &self.mode {
            LoopMode::Main { assembler } => {
                let assembled = assembler.assemble(&self.registry.catalog(), reports)?;
                Ok((assembled.system, assembled.history, assembled.needs_escalation))
            }
            LoopMode::Sub { task_prompt } => {
                Ok((vec![SystemBlock::cached(task_prompt.clone())], Vec::new(), false))
            }
        }
    }

    /// Append to the temporal log (main mode only) and announce it
    fn record(&self, kind: MessageKind, content: &str) {
        if matches!(self.mode, LoopMode::Sub { .. }) {
            return;
        }
        match self.store.temporal().append(kind, content) {
            Ok(id) => self.emit(Event::MessageAppended { id, kind }),
            Err(e) => warn!(error = %e, "failed to record message"),
        }
    }

    fn emit(&self, event: Event) {
        if let Some(bus) = &self.bus {
            bus.emit(event);
        }
    }
}
