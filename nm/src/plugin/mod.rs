//! External plugin tool servers
//!
//! Servers are configured as either a child process speaking line-delimited
//! JSON on stdio, or an HTTP endpoint (left to the embedding host). Tools a
//! server exposes are namespaced `serverName__toolName`; names that violate
//! the `[A-Za-z0-9_-]+` / 64-char rule are dropped with a reported issue
//! rather than failing the server.

mod config;
mod manager;
mod stdio;

pub use config::{PluginServerConfig, TransportKind};
pub use manager::{PluginManager, ServerState};
pub use stdio::StdioPluginClient;

/// Longest effective tool name the provider accepts
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Compose and validate `server__tool`. Returns the reason when invalid.
pub fn effective_tool_name(server: &str, tool: &str) -> Result<String, String> {
    let name = format!("{server}__{tool}");
    if name.len() > MAX_TOOL_NAME_LEN {
        return Err(format!("effective name '{name}' exceeds {MAX_TOOL_NAME_LEN} characters"));
    }
    if let Some(bad) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-') {
        return Err(format!("effective name '{name}' contains invalid character '{bad}'"));
    }
    Ok(name)
}
