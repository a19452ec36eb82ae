//! Infrastructure layer: config, logging, replay scripts and the scripted backend.

pub mod config;
pub mod contracts;
pub mod error;
pub mod logging;
pub mod replay_script;
pub mod scripted_api;
#[cfg(test)]
pub mod stubs;

/// Returns the infra module name for smoke checks.
pub fn module_name() -> &'static str {
    "infra"
}
