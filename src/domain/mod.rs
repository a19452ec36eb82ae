//! Domain layer: entities, merge rules and pure derivations.

pub mod aggregate;
pub mod conversation;
pub mod events;
pub mod grouping;
pub mod ids;
pub mod message;
pub mod message_cache;
pub mod timeline;
pub mod typing;

/// Returns the domain module name for smoke checks.
pub fn module_name() -> &'static str {
    "domain"
}
