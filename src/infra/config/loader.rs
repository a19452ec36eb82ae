use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::infra::{
    config::{file_config::FileConfig, AppConfig},
    error::AppError,
};

const CONFIG_PATH_ENV: &str = "CHATSYNC_CONFIG";
const LOCAL_CONFIG_PATH: &str = "chatsync.toml";
const APP_DIR_NAME: &str = "chatsync";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Loads the config, falling back to defaults when no file exists.
pub fn load(path: Option<&Path>) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::default();

    let Some(config_path) = resolve_path(path) else {
        return Ok(config);
    };

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "config file not found; using defaults");
        return Ok(config);
    }

    let raw = fs::read_to_string(&config_path).map_err(|source| AppError::ConfigRead {
        path: config_path.clone(),
        source,
    })?;

    let file_config: FileConfig = toml::from_str(&raw).map_err(|source| AppError::ConfigParse {
        path: config_path,
        source,
    })?;

    file_config.merge_into(&mut config);
    Ok(config)
}

/// Config file to read: the explicit path, then `$CHATSYNC_CONFIG`, then
/// `./chatsync.toml`, then `<config dir>/chatsync/config.toml`.
pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }

    let local = PathBuf::from(LOCAL_CONFIG_PATH);
    if local.exists() {
        return Some(local);
    }

    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
