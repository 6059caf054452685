//! Config path resolution
//!
//! Everything lives under the addon base directory:
//!
//! ```text
//! addons/quietblast/
//!   bin/<platform>/quietblast.so
//!   configs/core.toml
//!   configs/plugins/<plugin>/<plugin>.toml
//!   gamedata/<file>
//! ```

use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::{ConfigError, ConfigResult};

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "QUIETBLAST_HOME";

/// Base directory reported by the host bridge at load
static BRIDGE_BASE_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Record the base directory the host bridge resolved for this plugin.
///
/// The plugin is loaded by a game server process, so `current_exe` names the
/// server binary rather than this library. The bridge knows where it loaded
/// us from and passes that directory in. An empty path clears it.
pub fn set_base_dir(dir: impl Into<PathBuf>) {
    let dir = dir.into();
    *BRIDGE_BASE_DIR.write() = (!dir.as_os_str().is_empty()).then_some(dir);
}

/// Returns the quietblast base directory.
///
/// `QUIETBLAST_HOME` wins when set, then the directory set with
/// [`set_base_dir`].
pub fn quietblast_base_dir() -> ConfigResult<PathBuf> {
    let home = std::env::var_os(HOME_ENV).map(PathBuf::from);
    base_dir_from(home, BRIDGE_BASE_DIR.read().clone())
}

fn base_dir_from(home: Option<PathBuf>, bridge: Option<PathBuf>) -> ConfigResult<PathBuf> {
    home.filter(|h| !h.as_os_str().is_empty())
        .or(bridge)
        .ok_or(ConfigError::NoConfigDirectory)
}

/// Returns the base configs directory.
pub fn configs_dir() -> ConfigResult<PathBuf> {
    Ok(quietblast_base_dir()?.join("configs"))
}

/// Returns the path for a plugin's config file.
///
/// Path: `configs/plugins/{plugin_name}/{plugin_name}.toml`
pub fn plugin_config_path(plugin_name: &str) -> ConfigResult<PathBuf> {
    Ok(plugin_config_path_in(&configs_dir()?, plugin_name))
}

fn plugin_config_path_in(configs: &Path, plugin_name: &str) -> PathBuf {
    configs
        .join("plugins")
        .join(plugin_name)
        .join(format!("{}.toml", plugin_name))
}

/// Returns the core config path.
pub fn core_config_path() -> ConfigResult<PathBuf> {
    Ok(configs_dir()?.join("core.toml"))
}

/// Returns the directory gamedata files are read from.
pub fn gamedata_dir() -> ConfigResult<PathBuf> {
    Ok(quietblast_base_dir()?.join("gamedata"))
}

/// Resolve a gamedata file name; absolute paths are used as given.
pub fn gamedata_path(file: &str) -> ConfigResult<PathBuf> {
    let path = Path::new(file);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(gamedata_dir()?.join(path))
}
