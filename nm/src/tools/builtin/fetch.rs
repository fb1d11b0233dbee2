//! fetch tool - retrieve a URL and convert it to readable markdown

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::{CallCtx, Tool, ToolError, ToolOutcome, parse_args};

/// Largest response body accepted
const MAX_BODY_BYTES: usize = 1_000_000;

/// Largest output returned to the model
const MAX_OUTPUT_CHARS: usize = 50_000;

/// Fetch web content for the research sub-agent
pub struct FetchTool {
    http: reqwest::Client,
}

impl FetchTool {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("nuum/0.1 (fetch tool)")
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

impl Default for FetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct FetchParams {
    url: String,
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL. HTML is converted to markdown, JSON is pretty-printed."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "http(s) URL to fetch" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, input: Value, ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: FetchParams = parse_args(self.name(), &input)?;

        if !params.url.starts_with("http://") && !params.url.starts_with("https://") {
            return Ok(ToolOutcome::error("Error: URL must start with http:// or https://"));
        }

        let send = self.http.get(&params.url).send();
        let response = tokio::select! {
            result = send => match result {
                Ok(r) => r,
                Err(e) => return Ok(ToolOutcome::error(format!("Error: fetch failed: {e}"))),
            },
            _ = ctx.cancel.cancelled() => {
                return Ok(ToolOutcome::error("Error: fetch cancelled"));
            }
        };

        if !response.status().is_success() {
            return Ok(ToolOutcome::error(format!("Error: HTTP {}", response.status())));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return Ok(ToolOutcome::error(format!("Error: failed to read body: {e}"))),
        };

        if body.len() > MAX_BODY_BYTES {
            return Ok(ToolOutcome::error("Error: response too large (> 1MB)"));
        }

        let content = if content_type.contains("text/html") || content_type.contains("application/xhtml") {
            html2md::rewrite_html(&body, false)
        } else if content_type.contains("application/json") {
            match serde_json::from_str::<Value>(&body) {
                Ok(json) => serde_json::to_string_pretty(&json).unwrap_or(body),
                Err(_) => body,
            }
        } else {
            body
        };

        let output = if content.chars().count() > MAX_OUTPUT_CHARS {
            let cut: String = content.chars().take(MAX_OUTPUT_CHARS).collect();
            format!("{cut}…\n\n[truncated, {} chars total]", content.chars().count())
        } else {
            content
        };

        Ok(ToolOutcome::success(output).with_title(params.url))
    }
}
