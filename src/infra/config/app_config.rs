use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    pub logging: LogConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    /// When set, logs go to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    pub page_size: usize,
    pub edit_window_secs: u64,
    pub typing_ttl_ms: u64,
    pub preview_width: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            edit_window_secs: 15 * 60,
            typing_ttl_ms: 5_000,
            preview_width: 50,
        }
    }
}
