//! Tool system
//!
//! Tools are the model's only way to act. Each tool captures its
//! dependencies (store handles, bus, scheduler) when constructed; dispatch
//! goes through [`ToolRegistry`], which repairs bad calls instead of
//! killing the turn.

pub mod builtin;
mod registry;
mod traits;

pub use registry::{INVALID_TOOL_CALL, ToolRegistry};
pub use traits::{CallCtx, PermissionHook, Tool, ToolError, ToolOutcome, parse_args};
