//! Use case layer: synchronization workflows on top of the domain rules.

pub mod bootstrap;
pub mod context;
pub mod contracts;
pub mod edit_message;
pub mod error;
pub mod list_conversations;
pub mod load_older;
pub mod mark_read;
pub mod replay;
pub mod resync;
pub mod send_message;
pub mod sync_service;
pub mod typing_signal;

/// Returns the usecases module name for smoke checks.
pub fn module_name() -> &'static str {
    "usecases"
}
