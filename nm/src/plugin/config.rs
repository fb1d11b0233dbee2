//! Plugin server configuration

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One configured server: a stdio child process (`command`) or an HTTP
/// endpoint (`url`), never both
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginServerConfig {
    // Stdio transport
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,

    // HTTP transport
    pub url: Option<String>,
    pub headers: HashMap<String, String>,
    /// "streaming" (default for url) or "sse"
    pub transport: Option<String>,

    pub disabled: bool,
    pub timeout_ms: Option<u64>,
}

/// How to reach a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    HttpStreaming,
    HttpSse,
}

impl PluginServerConfig {
    /// Resolve the transport; misconfiguration is reported, not fatal
    pub fn transport_kind(&self) -> Result<TransportKind, String> {
        match (&self.command, &self.url) {
            (Some(_), Some(_)) => Err("both command and url configured".to_string()),
            (Some(_), None) => Ok(TransportKind::Stdio),
            (None, Some(_)) => match self.transport.as_deref() {
                None | Some("streaming") => Ok(TransportKind::HttpStreaming),
                Some("sse") => Ok(TransportKind::HttpSse),
                Some(other) => Err(format!("unknown transport '{other}'")),
            },
            (None, None) => Err("neither command nor url configured".to_string()),
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(30_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdio_transport() {
        let config: PluginServerConfig =
            serde_json::from_str(r#"{"command": "/usr/bin/searchd", "args": ["--quiet"]}"#).unwrap();
        assert_eq!(config.transport_kind().unwrap(), TransportKind::Stdio);
    }

    #[test]
    fn test_http_transports() {
        let streaming: PluginServerConfig =
            serde_json::from_str(r#"{"url": "http://localhost:9000"}"#).unwrap();
        assert_eq!(streaming.transport_kind().unwrap(), TransportKind::HttpStreaming);

        let sse: PluginServerConfig =
            serde_json::from_str(r#"{"url": "http://localhost:9000", "transport": "sse"}"#).unwrap();
        assert_eq!(sse.transport_kind().unwrap(), TransportKind::HttpSse);
    }

    #[test]
    fn test_misconfiguration_reported() {
        let neither = PluginServerConfig::default();
        assert!(neither.transport_kind().is_err());

        let both: PluginServerConfig =
            serde_json::from_str(r#"{"command": "x", "url": "http://y"}"#).unwrap();
        assert!(both.transport_kind().is_err());
    }
}
