//! Configuration system
//!
//! This module provides a trait-based configuration system that supports:
//! - Type-safe config structs via serde
//! - TOML file format
//! - Auto-generation of default configs
//!
//! # Example
//!
//! ```ignore
//! use serde::{Deserialize, Serialize};
//! use quietblast_core::PluginConfig;
//!
//! #[derive(Default, Serialize, Deserialize)]
//! pub struct MyPluginConfig {
//!     pub enabled: bool,
//! }
//!
//! impl PluginConfig for MyPluginConfig {
//!     const PLUGIN_NAME: &'static str = "my_plugin";
//! }
//!
//! let config = MyPluginConfig::load().unwrap_or_default();
//! ```

mod loader;

use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub use loader::{
    configs_dir, core_config_path, gamedata_dir, gamedata_path, plugin_config_path,
    quietblast_base_dir, set_base_dir, HOME_ENV,
};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Neither `QUIETBLAST_HOME` nor the host supplied a base directory
    #[error("Config directory not available - no base path from QUIETBLAST_HOME or the host")]
    NoConfigDirectory,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Read a TOML file, writing `T::default()` there first if it doesn't exist
fn load_or_create<T>(path: &Path, what: &str) -> ConfigResult<T>
where
    T: Default + Serialize + DeserializeOwned,
{
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: T = toml::from_str(&content)?;
        tracing::debug!("Loaded {} from {:?}", what, path);
        Ok(config)
    } else {
        let default = T::default();
        write_toml(path, &default)?;
        tracing::info!("Created default {} at {:?}", what, path);
        Ok(default)
    }
}

fn write_toml<T: Serialize>(path: &Path, value: &T) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(value)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Trait for plugin configuration types.
///
/// Implement this trait on your config struct to load it from its file,
/// writing the defaults there on first run.
///
/// Configs are stored at `configs/plugins/{PLUGIN_NAME}/{PLUGIN_NAME}.toml`
/// under the base directory.
pub trait PluginConfig: Default + Serialize + DeserializeOwned + Send + Sync {
    /// The plugin name used for config file path resolution.
    const PLUGIN_NAME: &'static str;

    /// Load config from file, creating default if missing.
    fn load() -> ConfigResult<Self> {
        Self::load_from(&plugin_config_path(Self::PLUGIN_NAME)?)
    }

    /// Load config from an explicit path, creating default if missing.
    fn load_from(path: &Path) -> ConfigResult<Self> {
        load_or_create(path, &format!("config for {}", Self::PLUGIN_NAME))
    }
}

/// Core configuration, loaded from `configs/core.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Enable debug logging
    pub debug: bool,

    /// `tracing` filter directive, e.g. `"info,quietblast_core::hooks=debug"`.
    /// `RUST_LOG` takes precedence when set.
    pub log_filter: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            version: 1,
            debug: false,
            log_filter: "info".to_string(),
        }
    }
}

impl CoreConfig {
    /// Load core config from file, creating default if missing.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&core_config_path()?)
    }

    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        load_or_create(path, "core config")
    }

    /// Filter directive to log with; `debug` forces at least debug level
    pub fn effective_filter(&self) -> String {
        let filter = self.log_filter.trim();
        match (self.debug, filter.is_empty()) {
            (true, true) => "debug".to_string(),
            (true, false) => format!("{},quietblast_core=debug,quietblast=debug", filter),
            (false, true) => "info".to_string(),
            (false, false) => filter.to_string(),
        }
    }
}
