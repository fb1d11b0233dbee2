//! Engine configuration
//!
//! Loaded from a YAML file when present, then overridden by environment:
//! `MODEL_REASONING` / `MODEL_WORKHORSE` / `MODEL_FAST` replace model-tier
//! ids, `AGENT_DB` replaces the store path, and `PLUGIN_SERVERS` (inline
//! JSON) merges over file-loaded plugin config with the inline entries
//! winning.

use std::collections::HashMap;
use std::path::PathBuf;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::plugin::PluginServerConfig;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub provider: ProviderConfig,
    pub memory: MemoryConfig,
    pub turn: TurnLimits,
    pub tasks: TaskLimits,
    pub plugins: HashMap<String, PluginServerConfig>,
    pub log_level: Option<String>,
}

/// Where the agent database lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Full path override; otherwise `<root>/<name>.db`
    pub path: Option<PathBuf>,
    /// Agent name, `^[a-z0-9_-]+$`, at most 64 chars
    pub name: String,
    /// Root directory; defaults to the platform data dir
    pub root: Option<PathBuf>,
    pub lock_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            name: "agent".to_string(),
            root: None,
            lock_timeout_ms: 30_000,
        }
    }
}

/// Provider endpoint and model tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub models: ModelTiers,
    /// Context window assumed for budget arithmetic
    pub context_window: usize,
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            models: ModelTiers::default(),
            context_window: 200_000,
            temperature: 1.0,
            timeout_ms: 600_000,
        }
    }
}

/// Model ids per tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelTiers {
    pub reasoning: String,
    pub workhorse: String,
    pub fast: String,
}

impl Default for ModelTiers {
    fn default() -> Self {
        Self {
            reasoning: "claude-opus-4-1".to_string(),
            workhorse: "claude-sonnet-4-5".to_string(),
            fast: "claude-haiku-4-5".to_string(),
        }
    }
}

/// Memory and distillation tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Fraction of the context window given to the assembled turn context,
    /// clamped to 0.30..=0.50
    pub budget_fraction: f64,
    /// Uncompressed-tail token count that triggers distillation; defaults
    /// to the temporal budget when unset
    pub distill_threshold_tokens: Option<usize>,
    /// Messages per level-1 distillation batch
    pub distill_batch: usize,
    /// Adjacent same-level distillations composed into the next level
    pub distill_compose: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            budget_fraction: 0.4,
            distill_threshold_tokens: None,
            distill_batch: 40,
            distill_compose: 4,
        }
    }
}

/// Turn loop limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnLimits {
    pub max_turns: u32,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self { max_turns: 50 }
    }
}

/// Background task limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskLimits {
    /// Running tasks allowed at once per database
    pub max_concurrent: usize,
    /// Alarm check interval
    pub alarm_poll_ms: u64,
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            alarm_poll_ms: 1_000,
        }
    }
}

impl Config {
    /// Load from an explicit file (or the defaults when None), then apply
    /// environment overrides
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .wrap_err_with(|| format!("failed to parse config {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment beats the file: model tiers, store path, inline plugins
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("MODEL_REASONING") {
            self.provider.models.reasoning = model;
        }
        if let Ok(model) = std::env::var("MODEL_WORKHORSE") {
            self.provider.models.workhorse = model;
        }
        if let Ok(model) = std::env::var("MODEL_FAST") {
            self.provider.models.fast = model;
        }
        if let Ok(path) = std::env::var("AGENT_DB") {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Ok(inline) = std::env::var("PLUGIN_SERVERS") {
            match serde_json::from_str::<HashMap<String, PluginServerConfig>>(&inline) {
                Ok(servers) => {
                    // Inline entries take precedence over file entries
                    for (name, server) in servers {
                        self.plugins.insert(name, server);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring malformed PLUGIN_SERVERS");
                }
            }
        }
    }

    /// Resolved store file path
    pub fn store_path(&self) -> PathBuf {
        if let Some(path) = &self.store.path {
            return path.clone();
        }
        let root = self
            .store
            .root
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join("nuum")))
            .unwrap_or_else(|| PathBuf::from("."));
        root.join(format!("{}.db", self.store.name))
    }

    /// Token budget for the assembled turn context
    pub fn context_budget(&self) -> usize {
        let fraction = self.memory.budget_fraction.clamp(0.30, 0.50);
        (self.provider.context_window as f64 * fraction) as usize
    }

    /// Uncompressed-tail size that triggers distillation
    pub fn distill_threshold(&self) -> usize {
        self.memory.distill_threshold_tokens.unwrap_or_else(|| self.context_budget())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in ["MODEL_REASONING", "MODEL_WORKHORSE", "MODEL_FAST", "AGENT_DB", "PLUGIN_SERVERS"] {
            // SAFETY: tests are serialized and nothing else reads env here
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = Config::load(None).unwrap();
        assert_eq!(config.turn.max_turns, 50);
        assert_eq!(config.tasks.max_concurrent, 3);
        assert!(config.store_path().to_string_lossy().ends_with("agent.db"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_models_and_db() {
        clear_env();
        unsafe {
            std::env::set_var("MODEL_WORKHORSE", "claude-test-model");
            std::env::set_var("AGENT_DB", "/tmp/custom/spot.db");
        }

        let config = Config::load(None).unwrap();
        assert_eq!(config.provider.models.workhorse, "claude-test-model");
        assert_eq!(config.store_path(), PathBuf::from("/tmp/custom/spot.db"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_inline_plugins_merge_over_file() {
        clear_env();
        let mut config: Config = serde_yaml::from_str(
            r#"
            plugins:
              search:
                command: /usr/bin/searchd
              notes:
                command: /usr/bin/notesd
            "#,
        )
        .unwrap();

        unsafe {
            std::env::set_var(
                "PLUGIN_SERVERS",
                r#"{"search": {"command": "/opt/override/searchd"}}"#,
            );
        }
        config.apply_env_overrides();

        assert_eq!(config.plugins.len(), 2);
        assert_eq!(
            config.plugins["search"].command.as_deref(),
            Some("/opt/override/searchd")
        );
        assert_eq!(config.plugins["notes"].command.as_deref(), Some("/usr/bin/notesd"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_budget_fraction_clamped() {
        clear_env();
        let mut config = Config::default();
        config.provider.context_window = 100_000;

        config.memory.budget_fraction = 0.9;
        assert_eq!(config.context_budget(), 50_000);

        config.memory.budget_fraction = 0.1;
        assert_eq!(config.context_budget(), 30_000);

        // Threshold defaults to the budget
        assert_eq!(config.distill_threshold(), 30_000);
    }
}
