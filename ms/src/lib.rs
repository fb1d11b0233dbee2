//! MemStore - embedded memory store for Nuum agents
//!
//! A single-file SQLite store holding the three tiers of agent memory:
//!
//! - The **temporal log**: an append-only chronological record of
//!   user/assistant/tool messages, plus the recursive distillations that
//!   keep it compact. Full-text indexed.
//! - The **present state**: mission, status, and an ordered task list.
//! - The **LTM tree**: a hierarchical, slug-addressed knowledge base with
//!   compare-and-swap versioning.
//!
//! Plus the bookkeeping the engine needs around them: background task
//! records, worker records for crash detection, schema migrations, a
//! cross-process lock directory per database, and a per-database FIFO
//! write mutex within the process.
//!
//! # Modules
//!
//! - [`id`] - time-sortable prefixed identifiers
//! - [`lock`] - cross-process lock directory with stale detection
//! - [`mutex`] - per-database FIFO write mutex registry
//! - [`db`] - store open, migrations, combined FTS search
//! - [`temporal`] - temporal log + distillations + view reconstruction
//! - [`ltm`] - long-term memory tree
//! - [`present`] - present state row
//! - [`tasks`] - background tasks and worker records

pub mod db;
pub mod error;
pub mod id;
pub mod lock;
pub mod ltm;
pub mod mutex;
pub mod present;
pub mod tasks;
pub mod temporal;

pub use db::{FtsHit, FtsKind, OpenOptions, Store};
pub use error::StoreError;
pub use id::{IdKind, new_id};
pub use lock::{FileLock, GRACE_MS, LOCK_POLL_MS, MAX_AGE_MS};
pub use ltm::{LtmEntry, LtmTree};
pub use present::{PresentSnapshot, PresentState, TaskItem, TaskItemStatus};
pub use tasks::{BackgroundTask, TaskKind, TaskStatus, Tasks, Worker, WorkerStatus, Workers};
pub use temporal::{
    Distillation, MessageKind, TemporalLog, TemporalMessage, TemporalView, ViewItem,
};

/// Current time in Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convenience result alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
