//! Event types

use memstore::{BackgroundTask, MessageKind, PresentSnapshot};

/// Everything the engine announces on the bus. Publication is ordered after
/// the store write that caused it.
#[derive(Debug, Clone)]
pub enum Event {
    /// A record was appended to the temporal log
    MessageAppended { id: String, kind: MessageKind },

    /// The distiller produced a new distillation
    DistillationCreated { id: String, level: u32 },

    /// Mission, status, or task list changed
    PresentChanged(PresentSnapshot),

    /// Background task state snapshot after any transition
    TasksChanged(Vec<BackgroundTask>),

    /// An LTM entry was created or mutated
    LtmChanged {
        slug: String,
        version: i64,
        agent_type: String,
    },

    /// A turn began processing user input
    TurnStarted,

    /// A turn finished with the given stop reason
    TurnCompleted { stop_reason: String, num_turns: u32 },

    /// Content was queued for mid-turn injection
    InjectionQueued { source: String },

    /// A background worker finished
    WorkerFinished { kind: String, ok: bool },
}

impl Event {
    /// Short name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::MessageAppended { .. } => "message-appended",
            Event::DistillationCreated { .. } => "distillation-created",
            Event::PresentChanged(_) => "present-changed",
            Event::TasksChanged(_) => "tasks-changed",
            Event::LtmChanged { .. } => "ltm-changed",
            Event::TurnStarted => "turn-started",
            Event::TurnCompleted { .. } => "turn-completed",
            Event::InjectionQueued { .. } => "injection-queued",
            Event::WorkerFinished { .. } => "worker-finished",
        }
    }
}
