//! Plugin manager - server lifecycle and tool registration
//!
//! Tracks every configured server through connecting → connected (or
//! degraded / failed / disabled) and produces `Tool` implementations for
//! the valid tools each one advertises. Invalid tool names degrade the
//! server instead of failing it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::tools::{CallCtx, Tool, ToolError, ToolOutcome};

use super::config::{PluginServerConfig, TransportKind};
use super::effective_tool_name;
use super::stdio::StdioPluginClient;

/// Server connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Connecting,
    Connected,
    /// Connected, but some advertised tools were skipped
    Degraded,
    Failed,
    Disabled,
}

struct ServerEntry {
    state: ServerState,
    client: Option<Arc<StdioPluginClient>>,
}

/// Owns all configured plugin servers for one session
pub struct PluginManager {
    servers: StdMutex<HashMap<String, ServerEntry>>,
    issues: StdMutex<Vec<String>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self {
            servers: StdMutex::new(HashMap::new()),
            issues: StdMutex::new(Vec::new()),
        }
    }

    /// Connect every configured server, returning the tools to register.
    /// Per-server failures are recorded as issues, never escalated.
    pub async fn connect_all(
        self: &Arc<Self>,
        configs: &HashMap<String, PluginServerConfig>,
    ) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();

        for (name, config) in configs {
            if config.disabled {
                self.set_state(name, ServerState::Disabled, None);
                continue;
            }

            match config.transport_kind() {
                Ok(TransportKind::Stdio) => {
                    self.set_state(name, ServerState::Connecting, None);
                    match self.connect_stdio(name, config).await {
                        Ok(mut server_tools) => tools.append(&mut server_tools),
                        Err(e) => {
                            self.report_issue(format!("server {name}: {e}"));
                            self.set_state(name, ServerState::Failed, None);
                        }
                    }
                }
                Ok(TransportKind::HttpStreaming) | Ok(TransportKind::HttpSse) => {
                    // HTTP transports are the embedding host's concern
                    self.report_issue(format!(
                        "server {name}: http transport is not handled by the engine"
                    ));
                    self.set_state(name, ServerState::Failed, None);
                }
                Err(reason) => {
                    self.report_issue(format!("server {name}: {reason}"));
                    self.set_state(name, ServerState::Failed, None);
                }
            }
        }

        tools
    }

    async fn connect_stdio(
        self: &Arc<Self>,
        name: &str,
        config: &PluginServerConfig,
    ) -> eyre::Result<Vec<Arc<dyn Tool>>> {
        let client = Arc::new(StdioPluginClient::launch(config).await?);
        let advertised = client.list_tools().await?;

        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        let mut skipped = 0usize;
        for tool in advertised {
            match effective_tool_name(name, &tool.name) {
                Ok(effective) => {
                    tools.push(Arc::new(PluginTool {
                        effective_name: effective,
                        remote_name: tool.name,
                        description: tool.description,
                        input_schema: tool.input_schema,
                        client: client.clone(),
                    }));
                }
                Err(reason) => {
                    skipped += 1;
                    self.report_issue(format!("server {name}: dropped tool: {reason}"));
                }
            }
        }

        let state = if skipped > 0 { ServerState::Degraded } else { ServerState::Connected };
        self.set_state(name, state, Some(client));
        info!(server = %name, tools = tools.len(), skipped, "plugin server connected");
        Ok(tools)
    }

    /// Current state of a server, if configured
    pub fn state(&self, server: &str) -> Option<ServerState> {
        self.servers.lock().expect("plugin state poisoned").get(server).map(|e| e.state)
    }

    /// Issues accumulated so far (dropped tools, failed servers)
    pub fn issues(&self) -> Vec<String> {
        self.issues.lock().expect("plugin issues poisoned").clone()
    }

    /// Shut every connected server down
    pub async fn shutdown(&self) {
        let clients: Vec<Arc<StdioPluginClient>> = {
            let servers = self.servers.lock().expect("plugin state poisoned");
            servers.values().filter_map(|e| e.client.clone()).collect()
        };
        for client in clients {
            client.shutdown().await;
        }
    }

    fn set_state(&self, server: &str, state: ServerState, client: Option<Arc<StdioPluginClient>>) {
        let mut servers = self.servers.lock().expect("plugin state poisoned");
        let entry = servers.entry(server.to_string()).or_insert(ServerEntry {
            state,
            client: None,
        });
        entry.state = state;
        if client.is_some() {
            entry.client = client;
        }
    }

    fn report_issue(&self, issue: String) {
        warn!(issue = %issue, "plugin issue");
        self.issues.lock().expect("plugin issues poisoned").push(issue);
    }

    /// Mark a server connecting (used when a host reconnects one later)
    pub fn mark_connecting(&self, server: &str) {
        self.set_state(server, ServerState::Connecting, None);
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A tool proxied to a plugin server
struct PluginTool {
    effective_name: String,
    remote_name: String,
    description: String,
    input_schema: Value,
    client: Arc<StdioPluginClient>,
}

#[async_trait]
impl Tool for PluginTool {
    fn name(&self) -> &str {
        &self.effective_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let output = self
            .client
            .call_tool(&self.remote_name, input)
            .await
            .map_err(ToolError::Exec)?;
        Ok(ToolOutcome::success(output))
    }
}
