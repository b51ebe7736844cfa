//! Error types for the task-registry-dnd crate.

use task_registry::RegistryError;

/// Errors raised while attaching a drag-and-drop binding.
#[derive(Debug, thiserror::Error)]
pub enum DndError {
    /// A listener could not be registered.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Invalid drag-and-drop configuration.
    #[error("config error: {0}")]
    Config(String),
}

/// Convenience type alias for task-registry-dnd results.
pub type Result<T> = std::result::Result<T, DndError>;
