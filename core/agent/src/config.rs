//! Agent runtime configuration.
//!
//! Loaded from `~/.shiftwatch/agent.toml` (or an explicit path). A missing
//! file yields defaults; employee and tenant ids can also come from the CLI,
//! which wins over the file.

use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".shiftwatch/agent.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentConfig {
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Overrides the daemon socket path for this process.
    #[serde(default)]
    pub socket_path: Option<String>,
}

pub fn default_config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<AgentConfig, String> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(AgentConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| {
        format!(
            "Failed to read agent config {}: {}",
            config_path.display(),
            err
        )
    })?;
    toml::from_str::<AgentConfig>(&content).map_err(|err| {
        format!(
            "Failed to parse agent config {}: {}",
            config_path.display(),
            err
        )
    })
}
