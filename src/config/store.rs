//! Configuration Storage
//!
//! Locate and load settings from disk.

use super::{Settings, SettingsError};
use std::path::PathBuf;

/// Environment variable naming an explicit settings file
pub const CONFIG_PATH_ENV: &str = "CHUNKSCRIBE_CONFIG";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "chunkscribe", "Chunkscribe")
}

/// Get the configuration directory path
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| {
            // Fallback to current directory
            std::env::current_dir().unwrap_or_default().join("config")
        })
}

/// Get the data directory path (persisted transcripts live below it)
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("data"))
}

/// Get the configuration file path
pub fn config_file() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir().join("settings.toml"))
}

/// Load settings from disk
pub fn load_settings() -> Result<Settings, SettingsError> {
    load_settings_from(&config_file())
}

/// Load settings from a specific file; a missing file yields defaults
pub fn load_settings_from(path: &std::path::Path) -> Result<Settings, SettingsError> {
    if !path.exists() {
        tracing::info!("No settings file at {:?}, using defaults", path);
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = toml::from_str(&content)?;

    tracing::info!("Settings loaded from {:?}", path);
    Ok(settings)
}
