//! Realtime push channels: row translation and subscription tasks.

pub mod adapter;
pub mod subscription;

/// Returns the realtime module name for smoke checks.
pub fn module_name() -> &'static str {
    "realtime"
}
