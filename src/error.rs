//! Error types for the task registry.

use crate::kind::TaskKind;
use crate::task::{ClearContext, TaskId};

/// Programmer errors raised synchronously while scheduling.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// The kind invokes a callback but none was supplied.
    #[error("{0} task requires a callback")]
    MissingCallback(TaskKind),

    /// The descriptor carried a resource this kind cannot manage.
    #[error("{kind} task cannot manage a {resource} resource")]
    ResourceMismatch {
        /// Kind being scheduled.
        kind: TaskKind,
        /// Name of the offending resource.
        resource: &'static str,
    },

    /// A required descriptor field is missing or out of range.
    #[error("invalid {kind} descriptor: {reason}")]
    InvalidDescriptor {
        /// Kind being scheduled.
        kind: TaskKind,
        /// What is wrong with the descriptor.
        reason: String,
    },

    /// The kind is backed by tokio timers or tasks but no runtime is active.
    #[error("{0} task requires a running tokio runtime")]
    NoRuntime(TaskKind),

    /// No live task has this id.
    #[error("no live task {0}")]
    UnknownTask(TaskId),

    /// The registry was torn down; nothing can be scheduled on it any more.
    #[error("registry has been destroyed")]
    Destroyed,

    /// Invalid registry configuration.
    #[error("config error: {0}")]
    Config(String),
}

/// What an awaiting caller observes when a task does not produce a value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// The backing task was cancelled before it completed.
    #[error("task cancelled: {0}")]
    Cancelled(ClearContext),

    /// The callback or the wrapped future reported a failure.
    #[error("task failed: {0}")]
    Failed(String),

    /// The registry was dropped while the task was still pending.
    #[error("registry dropped before the task settled")]
    Dropped,

    /// The task could not be scheduled at all.
    #[error("scheduling failed: {0}")]
    Schedule(#[from] RegistryError),
}

impl TaskError {
    /// Returns `true` for [`TaskError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Context of the cancellation, when this error is one.
    pub fn clear_context(&self) -> Option<&ClearContext> {
        match self {
            Self::Cancelled(ctx) => Some(ctx),
            _ => None,
        }
    }
}

/// Failure reported by a native stop operation.
///
/// The registry logs these and never hands them to the caller of `cancel`.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The emitter does not know the listener (already removed).
    #[error("listener {listener} is not registered for `{event}`")]
    UnknownListener {
        /// Event name the listener was attached to.
        event: String,
        /// Emitter-specific listener id.
        listener: u64,
    },

    /// The resource was already released, e.g. a double abort.
    #[error("resource already released: {0}")]
    AlreadyReleased(String),

    /// Any other platform failure.
    #[error("native cancel failed: {0}")]
    Native(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RegistryError>;
