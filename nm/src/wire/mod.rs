//! Host wire protocol (stdio embedding)

mod messages;
mod session;

pub use messages::{ControlAction, Inbound, Outbound};
pub use session::run_stdio;
