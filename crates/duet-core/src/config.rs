//! Configuration management for duet
//!
//! Model selection, sandbox limits and server settings, loaded from
//! `.duet/config.toml` with defaults for anything missing.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{DuetError, Result};

/// Top-level duet configuration
///
/// Loaded from `.duet/config.toml` under the project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuetConfig {
    /// Model backend and role assignment
    #[serde(default)]
    pub models: ModelConfig,

    /// Sandbox execution limits
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model for the planner role
    #[serde(default = "default_planner_model")]
    pub planner: String,

    /// Default model for the implementer role
    #[serde(default = "default_implementer_model")]
    pub implementer: String,

    /// Chat-completion endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Environment variable containing the bearer credential
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Maximum output tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Wall-clock limit for a single completion
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Wall-clock limit for one execution
    #[serde(default = "default_sandbox_timeout_secs")]
    pub timeout_secs: u64,

    /// Cap on captured combined output
    #[serde(default = "default_output_limit_bytes")]
    pub output_limit_bytes: usize,

    /// Parent directory for working areas (system temp dir when unset)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to serve on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Events held between the publisher and the transport
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

// Default value providers
fn default_planner_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

fn default_implementer_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_api_key_env() -> String {
    "DUET_API_KEY".to_string()
}

fn default_max_tokens() -> usize {
    4096
}

fn default_model_timeout_secs() -> u64 {
    120
}

fn default_sandbox_timeout_secs() -> u64 {
    30
}

fn default_output_limit_bytes() -> usize {
    1024 * 1024
}

fn default_port() -> u16 {
    7171
}

fn default_event_buffer() -> usize {
    1
}

impl DuetConfig {
    /// Path of the config file under a project root
    pub fn path(root: &Path) -> PathBuf {
        root.join(".duet/config.toml")
    }

    /// Load configuration from `.duet/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = Self::path(root);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content).map_err(|e| {
                DuetError::Config(format!(
                    "Failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })
        } else {
            tracing::debug!("No config at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.duet/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_path = Self::path(root);
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| DuetError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            planner: default_planner_model(),
            implementer: default_implementer_model(),
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_model_timeout_secs(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_sandbox_timeout_secs(),
            output_limit_bytes: default_output_limit_bytes(),
            scratch_dir: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            event_buffer: default_event_buffer(),
        }
    }
}
