use tracing_appender::non_blocking::WorkerGuard;

use crate::infra::config::AppConfig;

#[derive(Debug)]
pub struct AppContext {
    pub config: AppConfig,
    log_guard: Option<WorkerGuard>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            log_guard: None,
        }
    }

    /// Keeps the file writer alive until the context is dropped.
    pub fn with_log_guard(mut self, guard: Option<WorkerGuard>) -> Self {
        self.log_guard = guard;
        self
    }

    pub fn logs_to_file(&self) -> bool {
        self.log_guard.is_some()
    }
}
