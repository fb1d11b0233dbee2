//! Sub-agents
//!
//! Bounded turn-loop runs with a task prompt, a restricted tool set, and a
//! designated finish tool. Research and reflection run inline or as
//! background tasks; consolidation always runs in the background after a
//! noteworthy conversation window.

mod consolidator;
mod reflection;
mod research;
mod subagent;

pub use consolidator::{run_consolidation, should_consolidate};
pub use reflection::run_reflection;
pub use research::run_research;
pub use subagent::{SubAgentSpec, run_sub_agent};
