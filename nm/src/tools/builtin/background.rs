//! Background task tools
//!
//! Spawn research/reflection sub-agents, set alarms, and inspect the task
//! list. Results arrive as injected user content at the start of a later
//! turn; the cap refusal comes back as result text the model can plan
//! around.

use std::sync::Arc;

use async_trait::async_trait;
use memstore::{TaskKind, TaskStatus};
use serde::Deserialize;
use serde_json::Value;

use crate::sched::{SchedulerError, TaskScheduler};
use crate::tools::{CallCtx, Tool, ToolError, ToolOutcome, parse_args};

fn spawn_outcome(result: Result<memstore::BackgroundTask, SchedulerError>) -> Result<ToolOutcome, ToolError> {
    match result {
        Ok(task) => Ok(ToolOutcome::success(format!(
            "Started background {} task {}. Its report will arrive in a later turn.",
            task.kind, task.id
        ))),
        Err(e @ SchedulerError::TooManyTasks { .. }) => Ok(ToolOutcome::error(format!("Error: {e}"))),
        Err(SchedulerError::Store(e)) if e.is_recoverable() => {
            Ok(ToolOutcome::error(format!("Error: {e}")))
        }
        Err(SchedulerError::Store(e)) => Err(ToolError::Exec(e.into())),
    }
}

// === background_research ===

pub struct BackgroundResearchTool {
    scheduler: Arc<TaskScheduler>,
}

impl BackgroundResearchTool {
    pub fn new(scheduler: Arc<TaskScheduler>) -> Self {
        Self { scheduler }
    }
}

#[derive(Deserialize)]
struct ResearchParams {
    question: String,
}

#[async_trait]
impl Tool for BackgroundResearchTool {
    fn name(&self) -> &str {
        "background_research"
    }

    fn description(&self) -> &str {
        "Start a background research sub-agent on a question; it can browse and read files"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "question": { "type": "string" } },
            "required": ["question"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: ResearchParams = parse_args(self.name(), &input)?;
        spawn_outcome(self.scheduler.spawn(TaskKind::Research, &params.question))
    }
}

// === background_reflect ===

pub struct BackgroundReflectTool {
    scheduler: Arc<TaskScheduler>,
}

impl BackgroundReflectTool {
    pub fn new(scheduler: Arc<TaskScheduler>) -> Self {
        Self { scheduler }
    }
}

#[derive(Deserialize)]
struct ReflectParams {
    focus: String,
}

#[async_trait]
impl Tool for BackgroundReflectTool {
    fn name(&self) -> &str {
        "background_reflect"
    }

    fn description(&self) -> &str {
        "Start a background reflection sub-agent that reviews past history on a focus question"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "focus": { "type": "string" } },
            "required": ["focus"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: ReflectParams = parse_args(self.name(), &input)?;
        spawn_outcome(self.scheduler.spawn(TaskKind::Reflect, &params.focus))
    }
}

// === set_alarm ===

pub struct SetAlarmTool {
    scheduler: Arc<TaskScheduler>,
}

impl SetAlarmTool {
    pub fn new(scheduler: Arc<TaskScheduler>) -> Self {
        Self { scheduler }
    }
}

#[derive(Deserialize)]
struct AlarmParams {
    description: String,
    fires_in_seconds: i64,
}

#[async_trait]
impl Tool for SetAlarmTool {
    fn name(&self) -> &str {
        "set_alarm"
    }

    fn description(&self) -> &str {
        "Set an alarm; its description is delivered back after the given delay"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "description": { "type": "string" },
                "fires_in_seconds": { "type": "integer", "minimum": 1 }
            },
            "required": ["description", "fires_in_seconds"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: AlarmParams = parse_args(self.name(), &input)?;
        let fires_at = memstore::now_ms() + params.fires_in_seconds * 1_000;
        match self.scheduler.set_alarm(fires_at, &params.description) {
            Ok(task) => Ok(ToolOutcome::success(format!(
                "Alarm {} set for {} seconds from now.",
                task.id, params.fires_in_seconds
            ))),
            Err(e) => Ok(ToolOutcome::error(format!("Error: {e}"))),
        }
    }
}

// === list_tasks ===

pub struct ListTasksTool {
    scheduler: Arc<TaskScheduler>,
}

impl ListTasksTool {
    pub fn new(scheduler: Arc<TaskScheduler>) -> Self {
        Self { scheduler }
    }
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    status: Option<String>,
}

#[async_trait]
impl Tool for ListTasksTool {
    fn name(&self) -> &str {
        "list_tasks"
    }

    fn description(&self) -> &str {
        "List background tasks, optionally filtered by status"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["pending", "running", "completed", "failed", "cancelled"]
                }
            }
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: ListParams = parse_args(self.name(), &input)?;
        let status = match params.status.as_deref() {
            Some(s) => match TaskStatus::from_str(s) {
                Some(status) => Some(status),
                None => {
                    return Err(ToolError::InvalidArgs(format!(
                        "You provided {input} for tool list_tasks; schema violation: unknown status '{s}'"
                    )));
                }
            },
            None => None,
        };

        match self.scheduler.list(status) {
            Ok(tasks) if tasks.is_empty() => Ok(ToolOutcome::success("No background tasks.")),
            Ok(tasks) => Ok(ToolOutcome::success(
                tasks
                    .iter()
                    .map(|t| format!("{} [{}] {}: {}", t.id, t.status, t.kind, t.description))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )),
            Err(e) => Ok(ToolOutcome::error(format!("Error: {e}"))),
        }
    }
}

// === cancel_task ===

pub struct CancelTaskTool {
    scheduler: Arc<TaskScheduler>,
}

impl CancelTaskTool {
    pub fn new(scheduler: Arc<TaskScheduler>) -> Self {
        Self { scheduler }
    }
}

#[derive(Deserialize)]
struct CancelParams {
    id: String,
}

#[async_trait]
impl Tool for CancelTaskTool {
    fn name(&self) -> &str {
        "cancel_task"
    }

    fn description(&self) -> &str {
        "Cancel a pending or running background task by id"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: CancelParams = parse_args(self.name(), &input)?;
        match self.scheduler.cancel(&params.id) {
            Ok(task) => Ok(ToolOutcome::success(format!("Cancelled task {}.", task.id))),
            Err(e) => Ok(ToolOutcome::error(format!("Error: {e}"))),
        }
    }
}
