use std::path::PathBuf;

use serde::Deserialize;

use crate::infra::config::{AppConfig, LogConfig, SyncConfig};

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub logging: Option<FileLogConfig>,
    pub sync: Option<FileSyncConfig>,
}

impl FileConfig {
    pub fn merge_into(self, config: &mut AppConfig) {
        if let Some(logging) = self.logging {
            logging.merge_into(&mut config.logging);
        }

        if let Some(sync) = self.sync {
            sync.merge_into(&mut config.sync);
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileLogConfig {
    pub level: Option<String>,
    pub file: Option<PathBuf>,
}

impl FileLogConfig {
    fn merge_into(self, config: &mut LogConfig) {
        if let Some(level) = self.level {
            config.level = level;
        }

        if let Some(file) = self.file {
            config.file = Some(file);
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileSyncConfig {
    pub page_size: Option<usize>,
    pub edit_window_secs: Option<u64>,
    pub typing_ttl_ms: Option<u64>,
    pub preview_width: Option<usize>,
}

impl FileSyncConfig {
    fn merge_into(self, config: &mut SyncConfig) {
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }

        if let Some(window) = self.edit_window_secs {
            config.edit_window_secs = window;
        }

        if let Some(ttl) = self.typing_ttl_ms {
            config.typing_ttl_ms = ttl;
        }

        if let Some(width) = self.preview_width {
            config.preview_width = width;
        }
    }
}
