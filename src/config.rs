use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub models: ModelAliasConfig,
}

/// Where to find the Node runtime and the pi-ai module the bridge spawns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_node_path")]
    pub node_path: String,
    /// Working directory for the spawned process; must contain
    /// `node_modules/@mariozechner/pi-ai`. Optional: when unset, Node's
    /// runtime module resolution is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_path: Option<PathBuf>,
}

/// Per-dialect alias overrides merged over the built-in tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelAliasConfig {
    #[serde(default)]
    pub anthropic: HashMap<String, String>,
    #[serde(default)]
    pub openai: HashMap<String, String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            node_path: default_node_path(),
            module_path: None,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            provider: ProviderConfig::default(),
            models: ModelAliasConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    8099
}

fn default_node_path() -> String {
    "node".to_string()
}

impl BridgeConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir. Every field has a
    /// default, so a missing file yields the built-in config.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("copilot-bridge.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("copilot-bridge")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("copilot-bridge").join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(
                home.join(".config")
                    .join("copilot-bridge")
                    .join("config.toml"),
            );
        }
    }

    // Home directory fallback
    if let Some(home) = home_dir() {
        paths.push(home.join(".copilot-bridge.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
