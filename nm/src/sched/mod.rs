//! Background task scheduling

mod scheduler;

pub use scheduler::{SchedulerError, SubAgentRunner, TaskScheduler};
