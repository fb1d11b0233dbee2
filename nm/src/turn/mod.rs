//! Turn loop

mod engine;
mod inject;
mod observer;

pub use engine::{LoopMode, TurnConfig, TurnLoop, TurnResult, TurnStop};
pub use inject::{INJECTION_QUEUE_DEPTH, InjectionRx, InjectionTx, injection_channel};
pub use observer::TurnObserver;
