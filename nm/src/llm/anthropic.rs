//! Anthropic Messages API provider
//!
//! Blocking and SSE-streaming completions. Cache-control markers are
//! attached to the system blocks and the last three messages so the stable
//! prompt prefix is cached across turns.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{
    GenerateRequest, GenerateResponse, Message, MessageContent, Provider,
    ProviderError, StopReason, StreamChunk, ToolCall, Usage,
};

/// How many trailing messages get a cache-control marker
const CACHED_MESSAGE_TAIL: usize = 3;

/// Anthropic Messages API client for one model id
pub struct AnthropicProvider {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
}

impl AnthropicProvider {
    /// Create a provider. The API key is read from `api_key_env`.
    pub fn new(model: &str, base_url: &str, api_key_env: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let api_key = std::env::var(api_key_env).map_err(|_| {
            ProviderError::InvalidResponse(format!("environment variable {api_key_env} not set"))
        })?;

        let http = Client::builder().timeout(timeout).build().map_err(ProviderError::Network)?;

        Ok(Self {
            model: model.to_string(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request_body(&self, request: &GenerateRequest) -> serde_json::Value {
        let system: Vec<serde_json::Value> = request
            .system
            .iter()
            .map(|block| {
                let mut value = serde_json::json!({ "type": "text", "text": block.text });
                if block.cacheable {
                    value["cache_control"] = serde_json::json!({ "type": "ephemeral" });
                }
                value
            })
            .collect();

        let total = request.messages.len();
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .enumerate()
            .map(|(i, msg)| {
                let cache = i + CACHED_MESSAGE_TAIL >= total;
                self.convert_message(msg, cache)
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_output_tokens,
            "temperature": request.temperature,
            "system": system,
            "messages": messages,
        });

        if !request.tools.is_empty() {
            body["tools"] =
                serde_json::json!(request.tools.iter().map(|t| t.to_wire()).collect::<Vec<_>>());
        }

        body
    }

    fn convert_message(&self, msg: &Message, cache: bool) -> serde_json::Value {
        let mut blocks: Vec<serde_json::Value> = match &msg.content {
            MessageContent::Text(text) => {
                vec![serde_json::json!({ "type": "text", "text": text })]
            }
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|block| serde_json::to_value(block).expect("ContentBlock serializes"))
                .collect(),
        };

        if cache && let Some(last) = blocks.last_mut() {
            last["cache_control"] = serde_json::json!({ "type": "ephemeral" });
        }

        serde_json::json!({
            "role": msg.role,
            "content": blocks,
        })
    }

    fn parse_response(&self, api_response: ApiResponse) -> GenerateResponse {
        let mut text = None;
        let mut tool_calls = Vec::new();

        for block in api_response.content {
            match block {
                ApiContentBlock::Text { text: t } => text = Some(t),
                ApiContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall { id, name, args: input });
                }
            }
        }

        GenerateResponse {
            text,
            tool_calls,
            stop_reason: StopReason::from_wire(&api_response.stop_reason),
            usage: Usage {
                prompt_tokens: api_response.usage.input_tokens,
                completion_tokens: api_response.usage.output_tokens,
                cache_read_tokens: api_response.usage.cache_read_input_tokens.unwrap_or(0),
                cache_creation_tokens: api_response.usage.cache_creation_input_tokens.unwrap_or(0),
            },
            provider_metadata: serde_json::json!({ "model": api_response.model }),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_request_body(&request);
        let cancel = request.cancel.clone();

        let send = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let response = tokio::select! {
            result = send => result?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ProviderError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message });
        }

        let api_response: ApiResponse = tokio::select! {
            result = response.json() => result?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };
        Ok(self.parse_response(api_response))
    }

    async fn generate_stream(
        &self,
        request: GenerateRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<GenerateResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut body = self.build_request_body(&request);
        body["stream"] = serde_json::json!(true);
        let cancel = request.cancel.clone();

        let http_request = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body);

        let mut es = EventSource::new(http_request)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let mut full_text = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut current_tool: Option<(String, String, String)> = None; // (id, name, json_acc)
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = Usage::default();

        loop {
            let event = tokio::select! {
                event = es.next() => match event {
                    Some(e) => e,
                    None => break,
                },
                _ = cancel.cancelled() => {
                    es.close();
                    return Err(ProviderError::Cancelled);
                }
            };

            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    let data: serde_json::Value =
                        serde_json::from_str(&msg.data).map_err(ProviderError::Json)?;

                    match data["type"].as_str() {
                        Some("message_start") => {
                            if let Some(u) = data["message"].get("usage") {
                                usage.prompt_tokens = u["input_tokens"].as_u64().unwrap_or(0);
                                usage.cache_read_tokens =
                                    u["cache_read_input_tokens"].as_u64().unwrap_or(0);
                                usage.cache_creation_tokens =
                                    u["cache_creation_input_tokens"].as_u64().unwrap_or(0);
                            }
                        }
                        Some("content_block_start") => {
                            if let Some(block) = data.get("content_block")
                                && block["type"] == "tool_use"
                            {
                                let id = block["id"].as_str().unwrap_or("").to_string();
                                let name = block["name"].as_str().unwrap_or("").to_string();
                                current_tool = Some((id.clone(), name, String::new()));
                                let _ = chunk_tx.send(StreamChunk::ToolUseStart {
                                    id,
                                    name: block["name"].as_str().unwrap_or("").to_string(),
                                }).await;
                            }
                        }
                        Some("content_block_delta") => {
                            if let Some(delta) = data.get("delta") {
                                if let Some(text) = delta["text"].as_str() {
                                    full_text.push_str(text);
                                    let _ = chunk_tx.send(StreamChunk::TextDelta(text.to_string())).await;
                                }
                                if let Some(json) = delta["partial_json"].as_str()
                                    && let Some((_, _, ref mut acc)) = current_tool
                                {
                                    acc.push_str(json);
                                }
                            }
                        }
                        Some("content_block_stop") => {
                            if let Some((id, name, json)) = current_tool.take() {
                                let args: serde_json::Value =
                                    serde_json::from_str(&json).unwrap_or(serde_json::json!({}));
                                tool_calls.push(ToolCall { id: id.clone(), name, args });
                                let _ = chunk_tx.send(StreamChunk::ToolUseEnd { id }).await;
                            }
                        }
                        Some("message_delta") => {
                            if let Some(sr) = data["delta"]["stop_reason"].as_str() {
                                stop_reason = StopReason::from_wire(sr);
                            }
                            if let Some(u) = data.get("usage") {
                                usage.completion_tokens = u["output_tokens"].as_u64().unwrap_or(0);
                            }
                        }
                        Some("message_stop") => break,
                        _ => {}
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    let _ = chunk_tx.send(StreamChunk::Error(e.to_string())).await;
                    return Err(ProviderError::InvalidResponse(e.to_string()));
                }
            }
        }

        let _ = chunk_tx
            .send(StreamChunk::Done {
                stop_reason: stop_reason.clone(),
                usage,
            })
            .await;

        Ok(GenerateResponse {
            text: if full_text.is_empty() { None } else { Some(full_text) },
            tool_calls,
            stop_reason,
            usage,
            provider_metadata: serde_json::json!({ "model": self.model }),
        })
    }
}

// Messages API response types

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContentBlock>,
    stop_reason: String,
    model: String,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ApiContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
    cache_read_input_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
}
