use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::infra::{
    config::{load, resolve_path, AppConfig},
    contracts::ConfigAdapter,
};

/// Reads the config from the file picked at construction time.
#[derive(Debug, Clone, Default)]
pub struct FileConfigAdapter {
    source: Option<PathBuf>,
}

impl FileConfigAdapter {
    pub fn new(explicit: Option<&Path>) -> Self {
        Self {
            source: resolve_path(explicit),
        }
    }
}

impl ConfigAdapter for FileConfigAdapter {
    fn load(&self) -> Result<AppConfig> {
        let config = match self.source() {
            Some(path) => load(Some(path))?,
            None => AppConfig::default(),
        };
        Ok(config)
    }

    fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}
