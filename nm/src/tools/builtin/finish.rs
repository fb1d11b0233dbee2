//! Finish tools
//!
//! Calling one of these ends the loop: the turn engine watches for the
//! configured finish tool name and stops with its payload as the final
//! text. One constructor covers the main loop's `finish_turn` and every
//! sub-agent's `finish_*` variant.

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{CallCtx, Tool, ToolError, ToolOutcome};

/// A designated loop-terminating tool carrying a payload field
pub struct FinishTool {
    name: String,
    description: String,
    payload_field: &'static str,
}

impl FinishTool {
    pub fn new(name: &str, description: &str, payload_field: &'static str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            payload_field,
        }
    }

    /// Main loop terminator
    pub fn finish_turn() -> Self {
        Self::new(
            "finish_turn",
            "End the turn with a final summary for the user",
            "summary",
        )
    }

    /// Consolidator terminator
    pub fn finish_consolidation() -> Self {
        Self::new(
            "finish_consolidation",
            "Finish consolidating, summarizing what changed in the knowledge tree",
            "summary",
        )
    }

    /// Research terminator
    pub fn finish_research() -> Self {
        Self::new(
            "finish_research",
            "Finish researching and deliver the report",
            "report",
        )
    }

    /// Reflection terminator
    pub fn finish_reflection() -> Self {
        Self::new(
            "finish_reflection",
            "Finish reflecting and deliver the answer",
            "answer",
        )
    }
}

#[async_trait]
impl Tool for FinishTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        properties.insert(
            self.payload_field.to_string(),
            serde_json::json!({ "type": "string" }),
        );
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": [self.payload_field]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let payload = input[self.payload_field].as_str().unwrap_or_default().to_string();
        Ok(ToolOutcome::success(payload).with_title(&self.name))
    }
}
