//! Configuration file location and data folder resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable naming the data folder
pub const DATA_FOLDER_ENV: &str = "SHELF_DATA_FOLDER";

/// Name of the application directory under platform config/data dirs
const APP_DIR: &str = "shelf";

/// Data folder resolution, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. `data_folder` key of the TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config_file: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(config_path) = config_file {
        if let Ok(toml_content) = std::fs::read_to_string(config_path) {
            match toml::from_str::<toml::Value>(&toml_content) {
                Ok(config) => {
                    if let Some(folder) = config.get("data_folder").and_then(|v| v.as_str()) {
                        return PathBuf::from(folder);
                    }
                }
                Err(e) => warn!("Ignoring unparsable config file {}: {}", config_path.display(), e),
            }
        }
    }

    default_data_folder()
}

/// Locate the platform configuration file
///
/// On Linux `~/.config/shelf/config.toml` is preferred over `/etc/shelf/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"));
        let system_config = PathBuf::from("/etc").join(APP_DIR).join("config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    }

    let path = dirs::config_dir()
        .map(|d| d.join(APP_DIR).join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if path.exists() {
        Ok(path)
    } else {
        Err(Error::Config(format!("Config file not found: {:?}", path)))
    }
}

/// Get OS-dependent default data folder path
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./shelf_data"))
}
