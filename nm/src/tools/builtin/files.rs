//! File read tool for research sub-agents

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::{CallCtx, Tool, ToolError, ToolOutcome, parse_args};

/// Largest file slice returned to the model
const MAX_BYTES: usize = 65_536;

/// Read a file relative to the configured root
pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[derive(Deserialize)]
struct ReadFileParams {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file (up to 64KB per call; pass offset to continue)"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "offset": { "type": "integer", "minimum": 0, "description": "Byte offset to read from" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: ReadFileParams = parse_args(self.name(), &input)?;

        let path = PathBuf::from(&params.path);
        let resolved = if path.is_absolute() { path } else { self.root.join(path) };

        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => content,
            Err(e) => {
                return Ok(ToolOutcome::error(format!(
                    "Error: cannot read {}: {e}",
                    resolved.display()
                )));
            }
        };

        let offset = params.offset.unwrap_or(0).min(content.len());
        // Snap to a char boundary so the slice stays valid UTF-8
        let start = (offset..content.len())
            .find(|&i| content.is_char_boundary(i))
            .unwrap_or(content.len());
        let slice: String = content[start..].chars().take(MAX_BYTES / 4).collect();

        let remaining = content.len().saturating_sub(start + slice.len());
        let output = if remaining > 0 {
            format!("{slice}\n… [{remaining} bytes remain; continue with offset {}]", start + slice.len())
        } else {
            slice
        };

        Ok(ToolOutcome::success(output))
    }
}
