use std::path::Path;

use anyhow::Result;

use crate::infra::config::AppConfig;

/// Source of the effective application config.
pub trait ConfigAdapter {
    fn load(&self) -> Result<AppConfig>;

    /// File the config is read from, if any.
    fn source(&self) -> Option<&Path> {
        None
    }
}
