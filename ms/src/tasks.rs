//! Background task and worker records
//!
//! Tasks track sub-agent work (research, reflection) and alarms; terminal
//! states are final. Worker records exist so a fresh process can detect and
//! fail work left `running` by a crashed predecessor.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::Store;
use crate::error::StoreError;
use crate::id::{IdKind, new_id};
use crate::now_ms;

/// Kinds of background work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Research,
    Reflect,
    Alarm,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Research => "research",
            TaskKind::Reflect => "reflect",
            TaskKind::Alarm => "alarm",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "research" => Some(TaskKind::Research),
            "reflect" => Some(TaskKind::Reflect),
            "alarm" => Some(TaskKind::Alarm),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task lifecycle states; completed/failed/cancelled are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A background task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: String,
    pub kind: TaskKind,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: i64,
    pub fires_at: Option<i64>,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// Repository over background tasks
pub struct Tasks<'a> {
    store: &'a Store,
}

impl<'a> Tasks<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Create a task in `pending`; alarms carry their fire time
    pub fn create(
        &self,
        kind: TaskKind,
        description: &str,
        fires_at: Option<i64>,
    ) -> Result<BackgroundTask, StoreError> {
        let id = new_id(IdKind::Task);
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO background_tasks (id, kind, description, status, created_at, fires_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
                rusqlite::params![id, kind.as_str(), description, now_ms(), fires_at],
            )?;
            Ok(())
        })?;
        debug!(%id, kind = %kind, "created background task");
        self.get(&id)
    }

    pub fn get(&self, id: &str) -> Result<BackgroundTask, StoreError> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT id, kind, description, status, created_at, fires_at, result, error
                 FROM background_tasks WHERE id = ?1",
                [id],
                row_to_task,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => other.into(),
            })
        })
    }

    /// Move pending → running
    pub fn mark_running(&self, id: &str) -> Result<BackgroundTask, StoreError> {
        self.transition(id, TaskStatus::Running, None, None)
    }

    /// Terminal: completed with a result payload
    pub fn complete(&self, id: &str, result: &str) -> Result<BackgroundTask, StoreError> {
        self.transition(id, TaskStatus::Completed, Some(result), None)
    }

    /// Terminal: failed with an error
    pub fn fail(&self, id: &str, error: &str) -> Result<BackgroundTask, StoreError> {
        self.transition(id, TaskStatus::Failed, None, Some(error))
    }

    /// Terminal: cancelled
    pub fn cancel(&self, id: &str) -> Result<BackgroundTask, StoreError> {
        self.transition(id, TaskStatus::Cancelled, None, None)
    }

    fn transition(
        &self,
        id: &str,
        to: TaskStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<BackgroundTask, StoreError> {
        let current = self.get(id)?;
        if current.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "task {id} is already {} (terminal)",
                current.status
            )));
        }
        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE background_tasks SET status = ?2, result = COALESCE(?3, result),
                     error = COALESCE(?4, error)
                 WHERE id = ?1",
                rusqlite::params![id, to.as_str(), result, error],
            )?;
            Ok(())
        })?;
        debug!(%id, status = %to, "task transition");
        self.get(id)
    }

    /// Number of tasks currently `running`
    pub fn running_count(&self) -> Result<usize, StoreError> {
        self.store.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM background_tasks WHERE status = 'running'",
                [],
                |r| r.get(0),
            )?;
            Ok(n as usize)
        })
    }

    /// Tasks filtered by status (all when None), newest first
    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<BackgroundTask>, StoreError> {
        self.store.with_conn(|conn| {
            let mut out = Vec::new();
            match status {
                Some(status) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, kind, description, status, created_at, fires_at, result, error
                         FROM background_tasks WHERE status = ?1 ORDER BY id DESC",
                    )?;
                    let rows = stmt.query_map([status.as_str()], row_to_task)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, kind, description, status, created_at, fires_at, result, error
                         FROM background_tasks ORDER BY id DESC",
                    )?;
                    let rows = stmt.query_map([], row_to_task)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
            }
            Ok(out)
        })
    }

    /// Pending alarms whose fire time has passed
    pub fn due_alarms(&self, now: i64) -> Result<Vec<BackgroundTask>, StoreError> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, description, status, created_at, fires_at, result, error
                 FROM background_tasks
                 WHERE kind = 'alarm' AND status = 'pending' AND fires_at <= ?1
                 ORDER BY fires_at ASC",
            )?;
            let rows = stmt.query_map([now], row_to_task)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Fail everything left `running` (restart recovery). Returns how many.
    pub(crate) fn fail_running(&self, reason: &str) -> Result<usize, StoreError> {
        self.store.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE background_tasks SET status = 'failed', error = ?1 WHERE status = 'running'",
                [reason],
            )?;
            Ok(n)
        })
    }
}

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Running,
    Completed,
    Failed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Running => "running",
            WorkerStatus::Completed => "completed",
            WorkerStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(WorkerStatus::Running),
            "completed" => Some(WorkerStatus::Completed),
            "failed" => Some(WorkerStatus::Failed),
            _ => None,
        }
    }
}

/// A worker record (distiller, consolidator, sub-agent run)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub kind: String,
    pub status: WorkerStatus,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
}

/// Repository over worker records
pub struct Workers<'a> {
    store: &'a Store,
}

impl<'a> Workers<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Record a worker starting; returns its id
    pub fn start(&self, kind: &str) -> Result<String, StoreError> {
        let id = new_id(IdKind::Worker);
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO workers (id, kind, status, started_at) VALUES (?1, ?2, 'running', ?3)",
                rusqlite::params![id, kind, now_ms()],
            )?;
            Ok(())
        })?;
        Ok(id)
    }

    pub fn finish(&self, id: &str) -> Result<(), StoreError> {
        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE workers SET status = 'completed', completed_at = ?2 WHERE id = ?1",
                rusqlite::params![id, now_ms()],
            )?;
            Ok(())
        })
    }

    pub fn fail(&self, id: &str, error: &str) -> Result<(), StoreError> {
        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE workers SET status = 'failed', completed_at = ?2, error = ?3 WHERE id = ?1",
                rusqlite::params![id, now_ms(), error],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, id: &str) -> Result<Worker, StoreError> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT id, kind, status, started_at, completed_at, error FROM workers WHERE id = ?1",
                [id],
                row_to_worker,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => other.into(),
            })
        })
    }

    /// Any worker of `kind` currently running?
    pub fn is_running(&self, kind: &str) -> Result<bool, StoreError> {
        self.store.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM workers WHERE kind = ?1 AND status = 'running')",
                [kind],
                |r| r.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Fail workers left `running` by a previous process (started before
    /// this process's epoch). Returns how many were cleaned up.
    pub(crate) fn fail_stale(&self, epoch_ms: i64) -> Result<usize, StoreError> {
        self.store.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE workers SET status = 'failed', error = 'stale', completed_at = ?2
                 WHERE status = 'running' AND started_at < ?1",
                rusqlite::params![epoch_ms, now_ms()],
            )?;
            Ok(n)
        })
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<BackgroundTask> {
    let kind_str: String = row.get(1)?;
    let status_str: String = row.get(3)?;
    Ok(BackgroundTask {
        id: row.get(0)?,
        kind: TaskKind::from_str(&kind_str).unwrap_or(TaskKind::Research),
        description: row.get(2)?,
        status: TaskStatus::from_str(&status_str).unwrap_or(TaskStatus::Failed),
        created_at: row.get(4)?,
        fires_at: row.get(5)?,
        result: row.get(6)?,
        error: row.get(7)?,
    })
}

fn row_to_worker(row: &rusqlite::Row<'_>) -> rusqlite::Result<Worker> {
    let status_str: String = row.get(2)?;
    Ok(Worker {
        id: row.get(0)?,
        kind: row.get(1)?,
        status: WorkerStatus::from_str(&status_str).unwrap_or(WorkerStatus::Failed),
        started_at: row.get(3)?,
        completed_at: row.get(4)?,
        error: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use tempfile::tempdir;

    async fn open_temp() -> (tempfile::TempDir, Store) {
        let temp = tempdir().unwrap();
        let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();
        (temp, store)
    }

    #[tokio::test]
    async fn test_task_lifecycle() {
        let (_temp, store) = open_temp().await;
        let tasks = store.tasks();

        let task = tasks.create(TaskKind::Research, "find the docs", None).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        tasks.mark_running(&task.id).unwrap();
        assert_eq!(tasks.running_count().unwrap(), 1);

        let done = tasks.complete(&task.id, "report text").unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result.as_deref(), Some("report text"));
        assert_eq!(tasks.running_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let (_temp, store) = open_temp().await;
        let tasks = store.tasks();

        let task = tasks.create(TaskKind::Reflect, "think", None).unwrap();
        tasks.mark_running(&task.id).unwrap();
        tasks.fail(&task.id, "boom").unwrap();

        let again = tasks.complete(&task.id, "too late");
        assert!(matches!(again, Err(StoreError::Conflict(_))));

        let record = tasks.get(&task.id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_due_alarms() {
        let (_temp, store) = open_temp().await;
        let tasks = store.tasks();

        let now = now_ms();
        tasks.create(TaskKind::Alarm, "past", Some(now - 1_000)).unwrap();
        tasks.create(TaskKind::Alarm, "future", Some(now + 60_000)).unwrap();

        let due = tasks.due_alarms(now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].description, "past");
    }

    #[tokio::test]
    async fn test_fail_running_on_restart() {
        let (_temp, store) = open_temp().await;
        let tasks = store.tasks();

        let task = tasks.create(TaskKind::Research, "long job", None).unwrap();
        tasks.mark_running(&task.id).unwrap();

        let n = tasks.fail_running("process-restart").unwrap();
        assert_eq!(n, 1);
        let record = tasks.get(&task.id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("process-restart"));
    }

    #[tokio::test]
    async fn test_worker_stale_cleanup() {
        let (_temp, store) = open_temp().await;
        let workers = store.workers();

        let id = workers.start("distiller").unwrap();
        assert!(workers.is_running("distiller").unwrap());

        // Workers started after the epoch survive
        assert_eq!(workers.fail_stale(now_ms() - 10_000).unwrap(), 0);
        // Workers started before the epoch are failed as stale
        assert_eq!(workers.fail_stale(now_ms() + 10_000).unwrap(), 1);

        let record = workers.get(&id).unwrap();
        assert_eq!(record.status, WorkerStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("stale"));
    }

    #[tokio::test]
    async fn test_list_filter() {
        let (_temp, store) = open_temp().await;
        let tasks = store.tasks();

        let a = tasks.create(TaskKind::Research, "a", None).unwrap();
        tasks.create(TaskKind::Research, "b", None).unwrap();
        tasks.mark_running(&a.id).unwrap();

        assert_eq!(tasks.list(None).unwrap().len(), 2);
        assert_eq!(tasks.list(Some(TaskStatus::Running)).unwrap().len(), 1);
        assert_eq!(tasks.list(Some(TaskStatus::Pending)).unwrap().len(), 1);
    }
}
