//! Present state - mission, status, and the ordered task list
//!
//! A single mutable row, owned by the main agent and changed only through
//! its tool calls. Tasks keep insertion order unless a position is given.

use serde::{Deserialize, Serialize};

use crate::db::Store;
use crate::error::StoreError;

/// Task completion state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskItemStatus {
    Pending,
    Completed,
}

/// One entry in the present task list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: u64,
    pub text: String,
    pub status: TaskItemStatus,
}

/// The full present state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresentSnapshot {
    pub mission: String,
    pub status: String,
    pub tasks: Vec<TaskItem>,
}

impl PresentSnapshot {
    /// Render for the system prompt
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Mission: {}\n", if self.mission.is_empty() { "(unset)" } else { &self.mission }));
        out.push_str(&format!("Status: {}\n", if self.status.is_empty() { "(unset)" } else { &self.status }));
        if self.tasks.is_empty() {
            out.push_str("Tasks: none\n");
        } else {
            out.push_str("Tasks:\n");
            for task in &self.tasks {
                let mark = match task.status {
                    TaskItemStatus::Pending => " ",
                    TaskItemStatus::Completed => "x",
                };
                out.push_str(&format!("  [{mark}] #{} {}\n", task.id, task.text));
            }
        }
        out
    }
}

/// Repository over the single present-state row
pub struct PresentState<'a> {
    store: &'a Store,
}

impl<'a> PresentState<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub(crate) fn seed(&self) -> Result<(), StoreError> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO present_state (id, mission, status, tasks) VALUES (1, '', '', '[]')",
                [],
            )?;
            Ok(())
        })
    }

    pub fn get(&self) -> Result<PresentSnapshot, StoreError> {
        self.store.with_conn(|conn| {
            let (mission, status, tasks_json): (String, String, String) = conn.query_row(
                "SELECT mission, status, tasks FROM present_state WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            let tasks: Vec<TaskItem> = serde_json::from_str(&tasks_json)?;
            Ok(PresentSnapshot { mission, status, tasks })
        })
    }

    pub fn set_mission(&self, mission: &str) -> Result<PresentSnapshot, StoreError> {
        self.store.with_conn(|conn| {
            conn.execute("UPDATE present_state SET mission = ?1 WHERE id = 1", [mission])?;
            Ok(())
        })?;
        self.get()
    }

    pub fn set_status(&self, status: &str) -> Result<PresentSnapshot, StoreError> {
        self.store.with_conn(|conn| {
            conn.execute("UPDATE present_state SET status = ?1 WHERE id = 1", [status])?;
            Ok(())
        })?;
        self.get()
    }

    /// Append a task, or insert at `position` when given. Returns the new
    /// task's id with the snapshot.
    pub fn add_task(&self, text: &str, position: Option<usize>) -> Result<(u64, PresentSnapshot), StoreError> {
        let mut snapshot = self.get()?;
        let id = snapshot.tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        let item = TaskItem {
            id,
            text: text.to_string(),
            status: TaskItemStatus::Pending,
        };
        match position {
            Some(pos) if pos < snapshot.tasks.len() => snapshot.tasks.insert(pos, item),
            _ => snapshot.tasks.push(item),
        }
        self.put_tasks(&snapshot.tasks)?;
        Ok((id, self.get()?))
    }

    pub fn complete_task(&self, id: u64) -> Result<PresentSnapshot, StoreError> {
        let mut snapshot = self.get()?;
        let task = snapshot
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("task #{id}")))?;
        task.status = TaskItemStatus::Completed;
        self.put_tasks(&snapshot.tasks)?;
        self.get()
    }

    pub fn remove_task(&self, id: u64) -> Result<PresentSnapshot, StoreError> {
        let mut snapshot = self.get()?;
        let before = snapshot.tasks.len();
        snapshot.tasks.retain(|t| t.id != id);
        if snapshot.tasks.len() == before {
            return Err(StoreError::NotFound(format!("task #{id}")));
        }
        self.put_tasks(&snapshot.tasks)?;
        self.get()
    }

    fn put_tasks(&self, tasks: &[TaskItem]) -> Result<(), StoreError> {
        let json = serde_json::to_string(tasks)?;
        self.store.with_conn(|conn| {
            conn.execute("UPDATE present_state SET tasks = ?1 WHERE id = 1", [json])?;
            Ok(())
        })
    }
}
