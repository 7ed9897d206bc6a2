//! Configuration loading and data folder resolution
//!
//! Only bootstrap configuration (where the database lives) comes from the
//! process environment. Every runtime tunable — cadences, thresholds, review
//! policy — lives in the `settings` table and is read through
//! [`crate::db::settings`].

use crate::{Error, Result};
use std::path::PathBuf;

/// Environment variable that overrides the data folder location.
pub const DATA_DIR_ENV: &str = "ORCHARD_DATA_DIR";

/// Resolve the data folder, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. `ORCHARD_DATA_DIR` environment variable
/// 3. `data_dir` key in the TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_dir(cli_arg: Option<&str>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(DATA_DIR_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = find_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(data_dir) = config.get("data_dir").and_then(|v| v.as_str()) {
                    return PathBuf::from(data_dir);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    default_data_dir()
}

/// Get the database file path inside the data folder.
pub fn database_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("orchard.db")
}

/// Create the data folder if it does not exist yet.
pub fn ensure_data_dir(data_dir: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    Ok(())
}

/// Locate the configuration file for the platform.
fn find_config_file() -> Result<PathBuf> {
    // User config first, then a system-wide fallback on Unix
    if let Some(path) = dirs::config_dir().map(|d| d.join("orchard").join("config.toml")) {
        if path.exists() {
            return Ok(path);
        }
    }
    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/orchard/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }
    Err(Error::Config("No config file found".to_string()))
}

/// OS-dependent default data folder path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("orchard"))
        .unwrap_or_else(|| PathBuf::from("./orchard_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn cli_arg_wins() {
        std::env::set_var(DATA_DIR_ENV, "/tmp/from-env");
        let dir = resolve_data_dir(Some("/tmp/from-cli"));
        assert_eq!(dir, PathBuf::from("/tmp/from-cli"));
        std::env::remove_var(DATA_DIR_ENV);
    }

    #[test]
    #[serial]
    fn env_var_beats_default() {
        std::env::set_var(DATA_DIR_ENV, "/tmp/from-env");
        let dir = resolve_data_dir(None);
        assert_eq!(dir, PathBuf::from("/tmp/from-env"));
        std::env::remove_var(DATA_DIR_ENV);
    }

    #[test]
    #[serial]
    fn database_path_is_inside_data_dir() {
        let path = database_path(std::path::Path::new("/tmp/orchard-test"));
        assert_eq!(path, PathBuf::from("/tmp/orchard-test/orchard.db"));
    }
}
