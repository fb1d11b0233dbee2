//! Nuum - embedded conversational-agent engine with continuous memory
//!
//! Nuum keeps a bounded working context over an unbounded history. Three
//! tiers of durable state live in one embedded store (see the `memstore`
//! crate): the append-only temporal log with its recursive distillations,
//! the mutable present state, and the slug-addressed long-term knowledge
//! tree. Around the store sit the pieces that make it an agent:
//!
//! - [`turn`] - the model-call / tool-dispatch loop with cancellation and
//!   mid-turn injection
//! - [`context`] - per-turn prompt assembly inside a token budget
//! - [`distill`] - the worker that keeps the temporal view compact
//! - [`agents`] - bounded sub-agents (consolidator, research, reflection)
//! - [`sched`] - background task tracking, concurrency caps, alarms
//! - [`tools`] - the tool registry and builtin tool families
//! - [`llm`] - the provider abstraction and Anthropic client
//! - [`plugin`] - external tool-server configuration and stdio transport
//! - [`wire`] - the newline-delimited-JSON stdio embedding
//! - [`events`] - the in-process typed event bus

pub mod agents;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod context;
pub mod distill;
pub mod events;
pub mod llm;
pub mod plugin;
pub mod repl;
pub mod sched;
pub mod session;
pub mod tokens;
pub mod tools;
pub mod turn;
pub mod wire;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use config::Config;
pub use context::{AssembledContext, AssemblerConfig, ContextAssembler};
pub use distill::{DistillConfig, Distiller, is_noteworthy};
pub use events::{Event, EventBus};
pub use llm::{
    AnthropicProvider, GenerateRequest, GenerateResponse, ModelTier, Provider, ProviderError,
    create_provider,
};
pub use plugin::{PluginManager, PluginServerConfig, ServerState};
pub use sched::{SchedulerError, TaskScheduler};
pub use session::{InterruptHandle, Session};
pub use tools::{CallCtx, Tool, ToolError, ToolOutcome, ToolRegistry};
pub use turn::{
    InjectionRx, InjectionTx, TurnConfig, TurnLoop, TurnObserver, TurnResult, TurnStop,
    injection_channel,
};
