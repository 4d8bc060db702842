pub mod schema;

pub use schema::EngineConfig;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default botengine home directory (~/.botengine).
pub fn default_home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(".botengine"))
        .unwrap_or_else(|| PathBuf::from(".botengine"))
}

/// Load config from the given path, or return defaults if it doesn't exist.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if path.exists() {
        let contents = std::fs::read_to_string(path).context("failed to read engine config file")?;
        let config: EngineConfig = toml::from_str(&contents).context("failed to parse engine config (TOML)")?;
        Ok(config)
    } else {
        Ok(EngineConfig::default())
    }
}

/// Save config to the given path (TOML format).
pub fn save_config(config: &EngineConfig, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("failed to serialize engine config")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents).context("failed to write engine config file")?;
    Ok(())
}
