/// Client configuration.
/// Reads client.json from ~/.config/scrumkit/client.json (or platform equivalent).
use scrumkit_core::config::RealtimeConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default)]
    pub anon_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

fn default_backend_url() -> String {
    "http://localhost:54321".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            anon_key: String::new(),
            access_token: None,
            realtime: RealtimeConfig::default(),
        }
    }
}

/// Default config path: ~/.config/scrumkit/client.json
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scrumkit")
        .join("client.json")
}

pub fn read_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Load config from path. Returns default if the file is missing or invalid.
pub fn load_config(path: &Path) -> ClientConfig {
    if !path.exists() {
        log::info!(target: "scrumkit.config", "No config at {}, using defaults", path.display());
        return ClientConfig::default();
    }
    read_config(path).unwrap_or_else(|e| {
        log::warn!(
            target: "scrumkit.config",
            "Failed to load config {}: {}",
            path.display(),
            e
        );
        ClientConfig::default()
    })
}

pub fn save_config(path: &Path, config: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}
