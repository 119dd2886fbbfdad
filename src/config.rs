//! Configuration management
//!
//! Loads engine configuration from a TOML file with serde defaults per
//! field, plus the environment variables the core recognizes:
//! `<BACKEND>_API_KEY` for credentials, `CORE_DEBUG` for verbose logging,
//! `CORE_GRAPH=false` to disable the graph-based context pre-filter.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::catalog::ModelCatalogEntry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub catalog: Vec<ModelCatalogEntry>,

    /// Override for the per-user state directory.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_context_limit")]
    pub context_files: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            provider_timeout_secs: default_provider_timeout(),
            stream_timeout_secs: default_stream_timeout(),
            command_timeout_secs: default_command_timeout(),
            context_files: default_context_limit(),
        }
    }
}

fn default_backend() -> String {
    "groq".to_string()
}
fn default_endpoint() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_attempts() -> usize {
    3
}
fn default_provider_timeout() -> u64 {
    120
}
fn default_stream_timeout() -> u64 {
    300
}
fn default_command_timeout() -> u64 {
    120
}
fn default_context_limit() -> usize {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoint: default_endpoint(),
            model: default_model(),
            temperature: default_temperature(),
            agent: AgentConfig::default(),
            catalog: Vec::new(),
            state_dir: None,
        }
    }
}

impl Config {
    /// Load from an explicit path, or from `maestro.toml` in the current
    /// directory, falling back to defaults when neither exists.
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        let candidate = match path {
            Some(p) => Some(p.clone()),
            None => {
                let local = PathBuf::from("maestro.toml");
                local.exists().then_some(local)
            }
        };

        match candidate {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read config file {:?}", path))?;
                let config: Config = toml::from_str(&content)
                    .with_context(|| format!("invalid config file {:?}", path))?;
                Ok(config)
            }
            None => Ok(Config::default()),
        }
    }

    /// The per-user state directory holding symphonies, plans,
    /// checkpoints, the graph cache, and the execution history.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("maestro")
    }

    pub fn symphonies_dir(&self) -> PathBuf {
        self.state_dir().join("symphonies")
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.state_dir().join("plans")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.state_dir().join("checkpoints")
    }

    pub fn graph_cache_dir(&self) -> PathBuf {
        self.state_dir().join("graph-cache")
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir().join("history.jsonl")
    }

    /// Whether the graph-based context pre-filter is enabled.
    /// `CORE_GRAPH=false` turns it off.
    pub fn graph_enabled(&self) -> bool {
        !matches!(
            std::env::var("CORE_GRAPH").as_deref(),
            Ok("false") | Ok("0")
        )
    }

    /// The default catalog when the config file does not provide one: the
    /// configured model itself.
    pub fn effective_catalog(&self) -> Vec<ModelCatalogEntry> {
        if !self.catalog.is_empty() {
            return self.catalog.clone();
        }
        vec![ModelCatalogEntry {
            backend: self.backend.clone(),
            name: self.model.clone(),
            supports_tool_calls: true,
            cost_per_million: 1.0,
            avg_tokens_per_sec: 100.0,
            allowed_agent_roles: Vec::new(),
        }]
    }
}

/// Whether `CORE_DEBUG` verbose logging is on.
pub fn debug_enabled() -> bool {
    std::env::var("CORE_DEBUG").is_ok()
}
