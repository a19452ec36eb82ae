use std::path::Path;

use anyhow::Result;

use crate::{
    infra::{self, config::FileConfigAdapter, contracts::ConfigAdapter},
    usecases::context::AppContext,
};

pub fn bootstrap(config_path: Option<&Path>) -> Result<AppContext> {
    let config_adapter = FileConfigAdapter::new(config_path);
    let context = build_context(&config_adapter)?;
    let log_guard = infra::logging::init(&context.config.logging)?;
    let context = context.with_log_guard(log_guard);

    tracing::debug!(
        config_source = ?config_adapter.source(),
        log_level = %context.config.logging.level,
        logs_to_file = context.logs_to_file(),
        page_size = context.config.sync.page_size,
        "application context ready"
    );

    Ok(context)
}

fn build_context(config_adapter: &dyn ConfigAdapter) -> Result<AppContext> {
    Ok(AppContext::new(config_adapter.load()?))
}
