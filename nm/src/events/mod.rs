//! Event system
//!
//! In-process typed pub/sub for state-change notifications. One bus per
//! session, constructed at startup and passed through call sites; there is
//! no global bus.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use types::Event;
