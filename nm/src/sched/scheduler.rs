//! Task scheduler
//!
//! Tracks background tasks, enforces the per-database concurrency cap,
//! delivers completed payloads into the main agent's injection queue, and
//! fires alarms. Every state transition publishes a fresh task snapshot on
//! the bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::BoxFuture;
use memstore::{BackgroundTask, Store, StoreError, TaskKind, TaskStatus};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::events::{Event, EventBus};
use crate::turn::InjectionTx;

/// Produces the sub-agent future for one background task. Built by the
/// session so the scheduler stays ignorant of agent wiring.
pub type SubAgentRunner = Arc<
    dyn Fn(TaskKind, String, CancelToken) -> BoxFuture<'static, eyre::Result<String>> + Send + Sync,
>;

/// Scheduler failures surfaced to the calling tool
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("too many background tasks: {running} running (max {max})")]
    TooManyTasks { running: usize, max: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Background task coordinator for one session
pub struct TaskScheduler {
    store: Store,
    bus: EventBus,
    injector: InjectionTx,
    runner: SubAgentRunner,
    max_concurrent: usize,
    /// Cancel tokens for in-flight tasks
    running: StdMutex<HashMap<String, CancelToken>>,
}

impl TaskScheduler {
    pub fn new(
        store: Store,
        bus: EventBus,
        injector: InjectionTx,
        runner: SubAgentRunner,
        max_concurrent: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            injector,
            runner,
            max_concurrent,
            running: StdMutex::new(HashMap::new()),
        })
    }

    /// Create a task record, refusing past the concurrency cap
    pub fn create(&self, kind: TaskKind, description: &str) -> Result<BackgroundTask, SchedulerError> {
        let running = self.store.tasks().running_count()?;
        if running >= self.max_concurrent {
            return Err(SchedulerError::TooManyTasks {
                running,
                max: self.max_concurrent,
            });
        }
        let task = self.store.tasks().create(kind, description, None)?;
        self.publish_snapshot();
        Ok(task)
    }

    /// Create and launch a sub-agent task. The worker runs detached; its
    /// payload is injected into the next turn on completion.
    pub fn spawn(self: &Arc<Self>, kind: TaskKind, description: &str) -> Result<BackgroundTask, SchedulerError> {
        let task = self.create(kind, description)?;
        self.store.tasks().mark_running(&task.id)?;

        let cancel = CancelToken::new();
        self.running
            .lock()
            .expect("scheduler running map poisoned")
            .insert(task.id.clone(), cancel.clone());
        self.publish_snapshot();

        let scheduler = self.clone();
        let id = task.id.clone();
        let description = description.to_string();
        let work = (self.runner)(kind, description, cancel);

        tokio::spawn(async move {
            let worker_id = scheduler.store.workers().start(kind.as_str()).ok();

            let result = work.await;
            scheduler
                .running
                .lock()
                .expect("scheduler running map poisoned")
                .remove(&id);

            match result {
                Ok(payload) => {
                    info!(task_id = %id, "background task completed");
                    if let Err(e) = scheduler.complete(&id, &payload).await {
                        warn!(task_id = %id, error = %e, "failed to record completion");
                    }
                    if let Some(worker_id) = worker_id {
                        let _ = scheduler.store.workers().finish(&worker_id);
                    }
                    scheduler.bus.emit(Event::WorkerFinished {
                        kind: kind.as_str().to_string(),
                        ok: true,
                    });
                }
                Err(e) => {
                    warn!(task_id = %id, error = %e, "background task failed");
                    if let Err(record_err) = scheduler.fail(&id, &e.to_string()) {
                        warn!(task_id = %id, error = %record_err, "failed to record failure");
                    }
                    if let Some(worker_id) = worker_id {
                        let _ = scheduler.store.workers().fail(&worker_id, &e.to_string());
                    }
                    scheduler.bus.emit(Event::WorkerFinished {
                        kind: kind.as_str().to_string(),
                        ok: false,
                    });
                }
            }
        });

        self.store.tasks().get(&task.id).map_err(Into::into)
    }

    /// Terminal completion: record the payload, then deliver it
    pub async fn complete(&self, id: &str, payload: &str) -> Result<(), SchedulerError> {
        let task = self.store.tasks().complete(id, payload)?;
        self.publish_snapshot();
        self.queue_result(&task, payload).await;
        Ok(())
    }

    /// Terminal failure
    pub fn fail(&self, id: &str, error: &str) -> Result<(), SchedulerError> {
        self.store.tasks().fail(id, error)?;
        self.publish_snapshot();
        Ok(())
    }

    /// Deliver a payload into the injection queue for the next turn
    pub async fn queue_result(&self, task: &BackgroundTask, payload: &str) {
        let text = format!(
            "[background {} task {} finished]\n{}",
            task.kind, task.id, payload
        );
        if !self.injector.inject(text).await {
            warn!(task_id = %task.id, "injection queue closed; result dropped");
        }
        self.bus.emit(Event::InjectionQueued {
            source: format!("task:{}", task.id),
        });
    }

    /// Cancel a pending or running task
    pub fn cancel(&self, id: &str) -> Result<BackgroundTask, SchedulerError> {
        if let Some(cancel) = self
            .running
            .lock()
            .expect("scheduler running map poisoned")
            .remove(id)
        {
            cancel.cancel();
        }
        let task = self.store.tasks().cancel(id)?;
        self.publish_snapshot();
        Ok(task)
    }

    /// List tasks, optionally by status
    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<BackgroundTask>, SchedulerError> {
        self.store.tasks().list(status).map_err(Into::into)
    }

    /// Register an alarm that fires at `fires_at_ms`
    pub fn set_alarm(&self, fires_at_ms: i64, description: &str) -> Result<BackgroundTask, SchedulerError> {
        let task = self.store.tasks().create(TaskKind::Alarm, description, Some(fires_at_ms))?;
        self.publish_snapshot();
        Ok(task)
    }

    /// Background timer that fires due alarms into the injection queue
    pub fn start_alarm_timer(self: &Arc<Self>, poll: Duration) -> JoinHandle<()> {
        // Alarm resolution never drops below 1 s
        let poll = poll.max(Duration::from_secs(1));
        let scheduler = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match scheduler.store.tasks().due_alarms(memstore::now_ms()) {
                    Ok(due) => {
                        for alarm in due {
                            info!(alarm_id = %alarm.id, "alarm fired");
                            let payload = format!("[alarm] {}", alarm.description);
                            if let Err(e) = scheduler.store.tasks().complete(&alarm.id, &payload) {
                                warn!(alarm_id = %alarm.id, error = %e, "failed to complete alarm");
                                continue;
                            }
                            scheduler.publish_snapshot();
                            if !scheduler.injector.inject(payload).await {
                                return;
                            }
                            scheduler.bus.emit(Event::InjectionQueued {
                                source: format!("alarm:{}", alarm.id),
                            });
                        }
                    }
                    Err(e) => warn!(error = %e, "alarm sweep failed"),
                }
            }
        })
    }

    fn publish_snapshot(&self) {
        match self.store.tasks().list(None) {
            Ok(snapshot) => self.bus.emit(Event::TasksChanged(snapshot)),
            Err(e) => warn!(error = %e, "failed to snapshot tasks"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::injection_channel;
    use tempfile::tempdir;

    fn hang_runner() -> SubAgentRunner {
        Arc::new(|_kind, _description, cancel: CancelToken| {
            Box::pin(async move {
                cancel.cancelled().await;
                Err(eyre::eyre!("cancelled"))
            })
        })
    }

    fn echo_runner() -> SubAgentRunner {
        Arc::new(|_kind, description: String, _cancel| {
            Box::pin(async move { Ok(format!("report on: {description}")) })
        })
    }

    async fn setup(runner: SubAgentRunner) -> (tempfile::TempDir, Arc<TaskScheduler>, crate::turn::InjectionRx) {
        let temp = tempdir().unwrap();
        let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();
        let bus = EventBus::with_default_capacity();
        let (tx, rx) = injection_channel();
        let scheduler = TaskScheduler::new(store, bus, tx, runner, 3);
        (temp, scheduler, rx)
    }

    #[tokio::test]
    async fn test_fourth_concurrent_task_refused() {
        let (_temp, scheduler, _rx) = setup(hang_runner()).await;

        for i in 0..3 {
            scheduler
                .spawn(TaskKind::Research, &format!("job {i}"))
                .unwrap_or_else(|e| panic!("job {i} refused: {e}"));
        }

        let refused = scheduler.spawn(TaskKind::Research, "one too many");
        assert!(matches!(refused, Err(SchedulerError::TooManyTasks { .. })));
        assert!(refused.unwrap_err().to_string().contains("too many background tasks"));
    }

    #[tokio::test]
    async fn test_completion_delivers_payload_once() {
        let (_temp, scheduler, mut rx) = setup(echo_runner()).await;

        let task = scheduler.spawn(TaskKind::Research, "the moon").unwrap();

        // Wait for the detached worker to finish
        for _ in 0..50 {
            if scheduler.store.tasks().get(&task.id).unwrap().status == TaskStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let drained = rx.try_drain();
        assert_eq!(drained.len(), 1);
        assert!(drained[0].contains("report on: the moon"));
        assert!(drained[0].contains(&task.id));

        // Nothing further arrives
        assert!(rx.try_drain().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let (_temp, scheduler, mut rx) = setup(hang_runner()).await;

        let task = scheduler.spawn(TaskKind::Reflect, "ponder").unwrap();
        let cancelled = scheduler.cancel(&task.id).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        // Give the worker a moment to observe cancellation; the failed
        // record write is refused because the task is already terminal
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            scheduler.store.tasks().get(&task.id).unwrap().status,
            TaskStatus::Cancelled
        );
        assert!(rx.try_drain().is_empty());
    }

    #[tokio::test]
    async fn test_due_alarm_fires_into_queue() {
        let (_temp, scheduler, mut rx) = setup(echo_runner()).await;

        scheduler.set_alarm(memstore::now_ms() - 100, "stand up").unwrap();
        let timer = scheduler.start_alarm_timer(Duration::from_secs(1));

        let mut fired = Vec::new();
        for _ in 0..40 {
            fired = rx.try_drain();
            if !fired.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        timer.abort();

        assert_eq!(fired.len(), 1);
        assert!(fired[0].contains("[alarm] stand up"));
    }

    #[tokio::test]
    async fn test_snapshot_published_on_transitions() {
        let (_temp, scheduler, _rx) = setup(echo_runner()).await;
        let mut events = scheduler.bus.subscribe();

        scheduler.create(TaskKind::Research, "snapshot check").unwrap();

        match events.recv().await.unwrap() {
            Event::TasksChanged(snapshot) => {
                assert_eq!(snapshot.len(), 1);
                assert_eq!(snapshot[0].description, "snapshot check");
            }
            other => panic!("unexpected event {}", other.event_type()),
        }
    }
}
