//! Present state tools - mission, status, task list

use std::sync::Arc;

use async_trait::async_trait;
use memstore::{PresentSnapshot, Store, StoreError};
use serde::Deserialize;
use serde_json::Value;

use crate::events::{Event, EventBus};
use crate::tools::{CallCtx, Tool, ToolError, ToolOutcome, parse_args};

#[derive(Clone)]
struct PresentDeps {
    store: Store,
    bus: EventBus,
}

impl PresentDeps {
    fn publish(&self, snapshot: &PresentSnapshot) {
        self.bus.emit(Event::PresentChanged(snapshot.clone()));
    }
}

fn outcome(
    deps: &PresentDeps,
    result: Result<(String, PresentSnapshot), StoreError>,
) -> Result<ToolOutcome, ToolError> {
    match result {
        Ok((text, snapshot)) => {
            deps.publish(&snapshot);
            Ok(ToolOutcome::success(text))
        }
        Err(e) if e.is_recoverable() => Ok(ToolOutcome::error(format!("Error: {e}"))),
        Err(e) => Err(ToolError::Exec(e.into())),
    }
}

/// The full present-state family for the main agent
pub fn present_tools(store: Store, bus: EventBus) -> Vec<Arc<dyn Tool>> {
    let deps = PresentDeps { store, bus };
    vec![
        Arc::new(SetMissionTool { deps: deps.clone() }),
        Arc::new(SetStatusTool { deps: deps.clone() }),
        Arc::new(AddTaskTool { deps: deps.clone() }),
        Arc::new(CompleteTaskTool { deps: deps.clone() }),
        Arc::new(RemoveTaskTool { deps }),
    ]
}

// === set_mission ===

pub struct SetMissionTool {
    deps: PresentDeps,
}

#[derive(Deserialize)]
struct MissionParams {
    mission: String,
}

#[async_trait]
impl Tool for SetMissionTool {
    fn name(&self) -> &str {
        "set_mission"
    }

    fn description(&self) -> &str {
        "Set the current mission statement"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "mission": { "type": "string" } },
            "required": ["mission"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: MissionParams = parse_args(self.name(), &input)?;
        let result = self
            .deps
            .store
            .present()
            .set_mission(&params.mission)
            .map(|s| ("Mission updated.".to_string(), s));
        outcome(&self.deps, result)
    }
}

// === set_status ===

pub struct SetStatusTool {
    deps: PresentDeps,
}

#[derive(Deserialize)]
struct StatusParams {
    status: String,
}

#[async_trait]
impl Tool for SetStatusTool {
    fn name(&self) -> &str {
        "set_status"
    }

    fn description(&self) -> &str {
        "Set the current status line"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "status": { "type": "string" } },
            "required": ["status"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: StatusParams = parse_args(self.name(), &input)?;
        let result = self
            .deps
            .store
            .present()
            .set_status(&params.status)
            .map(|s| ("Status updated.".to_string(), s));
        outcome(&self.deps, result)
    }
}

// === add_task ===

pub struct AddTaskTool {
    deps: PresentDeps,
}

#[derive(Deserialize)]
struct AddTaskParams {
    text: String,
    #[serde(default)]
    position: Option<usize>,
}

#[async_trait]
impl Tool for AddTaskTool {
    fn name(&self) -> &str {
        "add_task"
    }

    fn description(&self) -> &str {
        "Add a task to the list, optionally at a position (0-based)"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "position": { "type": "integer", "minimum": 0 }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: AddTaskParams = parse_args(self.name(), &input)?;
        let result = self
            .deps
            .store
            .present()
            .add_task(&params.text, params.position)
            .map(|(id, s)| (format!("Added task #{id}."), s));
        outcome(&self.deps, result)
    }
}

// === complete_task ===

pub struct CompleteTaskTool {
    deps: PresentDeps,
}

#[derive(Deserialize)]
struct TaskIdParams {
    id: u64,
}

#[async_trait]
impl Tool for CompleteTaskTool {
    fn name(&self) -> &str {
        "complete_task"
    }

    fn description(&self) -> &str {
        "Mark a task completed by id"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "id": { "type": "integer" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: TaskIdParams = parse_args(self.name(), &input)?;
        let result = self
            .deps
            .store
            .present()
            .complete_task(params.id)
            .map(|s| (format!("Completed task #{}.", params.id), s));
        outcome(&self.deps, result)
    }
}

// === remove_task ===

pub struct RemoveTaskTool {
    deps: PresentDeps,
}

#[async_trait]
impl Tool for RemoveTaskTool {
    fn name(&self) -> &str {
        "remove_task"
    }

    fn description(&self) -> &str {
        "Remove a task from the list by id"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "id": { "type": "integer" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: TaskIdParams = parse_args(self.name(), &input)?;
        let result = self
            .deps
            .store
            .present()
            .remove_task(params.id)
            .map(|s| (format!("Removed task #{}.", params.id), s));
        outcome(&self.deps, result)
    }
}
