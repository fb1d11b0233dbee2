//! Stdio plugin transport
//!
//! A child process exchanging one JSON object per line: requests carry an
//! id, a method, and params; responses echo the id with a result or error.
//! HTTP transports are owned by the embedding host.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use eyre::{Context, Result, eyre};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;

use super::config::PluginServerConfig;

/// A tool advertised by a server
#[derive(Debug, Clone)]
pub struct AdvertisedTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Line-JSON client over a child process
pub struct StdioPluginClient {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl StdioPluginClient {
    /// Launch the configured command
    pub async fn launch(config: &PluginServerConfig) -> Result<Self> {
        let command = config
            .command
            .as_deref()
            .ok_or_else(|| eyre!("stdio server has no command"))?;

        let mut cmd = Command::new(command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().wrap_err_with(|| format!("failed to launch {command}"))?;
        let stdin = child.stdin.take().ok_or_else(|| eyre!("no stdin pipe"))?;
        let stdout = child.stdout.take().ok_or_else(|| eyre!("no stdout pipe"))?;

        debug!(command, "launched plugin server");
        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            next_id: AtomicU64::new(1),
            timeout: Duration::from_millis(config.timeout_ms()),
        })
    }

    /// One request/response round trip
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&serde_json::json!({
            "id": id,
            "method": method,
            "params": params,
        }))?;

        {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
        }

        let response = tokio::time::timeout(self.timeout, async {
            let mut stdout = self.stdout.lock().await;
            let mut buf = String::new();
            loop {
                buf.clear();
                let n = stdout.read_line(&mut buf).await?;
                if n == 0 {
                    return Err(eyre!("server closed stdout"));
                }
                let value: Value = match serde_json::from_str(buf.trim()) {
                    Ok(v) => v,
                    // Non-JSON noise on stdout is skipped
                    Err(_) => continue,
                };
                if value["id"].as_u64() == Some(id) {
                    return Ok(value);
                }
            }
        })
        .await
        .map_err(|_| eyre!("server timed out after {:?}", self.timeout))??;

        if let Some(error) = response.get("error")
            && !error.is_null()
        {
            return Err(eyre!("server error: {error}"));
        }
        Ok(response["result"].clone())
    }

    /// List the tools the server exposes
    pub async fn list_tools(&self) -> Result<Vec<AdvertisedTool>> {
        let result = self.request("tools/list", Value::Null).await?;
        let tools = result["tools"]
            .as_array()
            .ok_or_else(|| eyre!("tools/list returned no tools array"))?;

        Ok(tools
            .iter()
            .filter_map(|t| {
                Some(AdvertisedTool {
                    name: t["name"].as_str()?.to_string(),
                    description: t["description"].as_str().unwrap_or("").to_string(),
                    input_schema: t
                        .get("input_schema")
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
                })
            })
            .collect())
    }

    /// Invoke one tool, returning its textual output
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<String> {
        let result = self
            .request("tools/call", serde_json::json!({ "name": name, "arguments": args }))
            .await?;
        Ok(match result.get("output") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => result.to_string(),
        })
    }

    /// Terminate the child process
    pub async fn shutdown(&self) {
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginServerConfig;

    /// `cat` echoes every request line back verbatim, which is a valid
    /// response only if we make the request double as one
    fn cat_config() -> PluginServerConfig {
        PluginServerConfig {
            command: Some("cat".to_string()),
            timeout_ms: Some(2_000),
            ..PluginServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_roundtrip_against_cat() {
        let client = StdioPluginClient::launch(&cat_config()).await.unwrap();

        // cat echoes the request; the echoed object carries our id, so
        // request() accepts it and hands back its "result" field (absent,
        // so null)
        let result = client.request("tools/list", Value::Null).await.unwrap();
        assert!(result.is_null());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_launch_missing_command_fails() {
        let config = PluginServerConfig {
            command: Some("/definitely/not/a/real/binary".to_string()),
            ..PluginServerConfig::default()
        };
        assert!(StdioPluginClient::launch(&config).await.is_err());
    }
}
