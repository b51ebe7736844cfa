//! Task descriptors, callbacks and cancellation context.
//!
//! A [`Descriptor`] is either a bare [`Callback`] or a full [`TaskOptions`]
//! value; it is resolved once when it reaches the registry.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::emitter::EventEmitter;
use crate::key::Key;
use crate::kind::TaskKind;
use crate::native::{Abort, Worker};

/// Dynamic value passed into callbacks and produced by tasks.
pub type Payload = serde_json::Value;

/// Opaque handle of a scheduled task, unique within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Numeric value of the id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// What a callback reports back to the registry.
pub enum Outcome {
    /// Completed with a value.
    Value(Payload),
    /// Completed with a failure.
    Failed(String),
    /// Completes when the future settles.
    Deferred(BoxFuture<'static, Result<Payload, String>>),
    /// Recurring tasks only: nothing to report for this invocation.
    Continue,
    /// Recurring tasks only: report the value and retire the task.
    Finish(Payload),
}

impl From<()> for Outcome {
    fn from(_: ()) -> Self {
        Self::Value(Payload::Null)
    }
}

impl From<Payload> for Outcome {
    fn from(value: Payload) -> Self {
        Self::Value(value)
    }
}

impl From<Result<Payload, String>> for Outcome {
    fn from(result: Result<Payload, String>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(e) => Self::Failed(e),
        }
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
            Self::Continue => f.write_str("Continue"),
            Self::Finish(v) => f.debug_tuple("Finish").field(v).finish(),
        }
    }
}

/// Caller code run when a task fires.
pub type Callback = Box<dyn FnMut(Payload) -> Outcome + Send + 'static>;

/// Box a closure as a [`Callback`].
///
/// The closure may return anything convertible into an [`Outcome`]: `()`,
/// a [`Payload`], a `Result<Payload, String>` or an `Outcome` itself.
pub fn callback<F, R>(mut f: F) -> Callback
where
    F: FnMut(Payload) -> R + Send + 'static,
    R: Into<Outcome>,
{
    Box::new(move |payload| f(payload).into())
}

/// Hook run once when a task is cancelled before completing.
pub type ClearHook = Box<dyn FnOnce(&ClearContext) + Send + 'static>;

/// Why a task left the registry without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearReason {
    /// Explicit or bulk `cancel`.
    Cancelled,
    /// A new task took its label without joining.
    Superseded,
    /// A new task took its label with [`Join::Replace`].
    Replaced,
    /// The registry was destroyed.
    Teardown,
}

/// Describes a cancelled task to `on_clear` hooks and awaiting callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ClearContext {
    /// Id of the cancelled task.
    pub id: TaskId,
    /// Kind of the cancelled task.
    pub kind: TaskKind,
    /// Label the task held, if any.
    pub label: Option<Key>,
    /// Group the task lived in; `None` is the root scope.
    pub group: Option<Key>,
    /// Task that replaced this one through [`Join::Replace`].
    pub replaced_by: Option<TaskId>,
    /// Cancellation path.
    pub reason: ClearReason,
}

impl std::fmt::Display for ClearContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}", self.id, self.kind)?;
        if let Some(label) = &self.label {
            write!(f, ", label={label}")?;
        }
        if let Some(group) = &self.group {
            write!(f, ", group={group}")?;
        }
        if let Some(next) = self.replaced_by {
            write!(f, ", replaced by {next}")?;
        }
        f.write_str(")")
    }
}

/// Policy applied when a label is already held by a live task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Join {
    /// Cancel the existing task and start the new one.
    #[default]
    Supersede,
    /// Keep the existing task; the new one is discarded.
    Keep,
    /// Cancel the existing task and move its waiters onto the new one.
    Replace,
}

impl From<bool> for Join {
    fn from(join: bool) -> Self {
        if join { Self::Keep } else { Self::Supersede }
    }
}

/// Native resource handed to the registry along with the descriptor.
pub enum Resource {
    /// Handle terminated on cancel.
    Worker(Box<dyn Worker>),
    /// Request future plus an optional abort hook.
    Request {
        /// Drives the request to completion.
        future: BoxFuture<'static, Result<Payload, String>>,
        /// Called with the cancellation context when the request is cancelled.
        abort: Option<Box<dyn Abort>>,
    },
    /// Emitter and event name to listen on.
    Listener {
        /// Emitter the listener is attached to.
        emitter: Arc<dyn EventEmitter>,
        /// Event name.
        event: String,
    },
    /// Future settled through a proxy task.
    Future(BoxFuture<'static, Result<Payload, String>>),
}

impl Resource {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Worker(_) => "worker",
            Self::Request { .. } => "request",
            Self::Listener { .. } => "listener",
            Self::Future(_) => "future",
        }
    }
}

/// Full task descriptor.
#[derive(Default)]
pub struct TaskOptions {
    pub(crate) callback: Option<Callback>,
    pub(crate) join: Join,
    pub(crate) label: Option<Key>,
    pub(crate) group: Option<Key>,
    pub(crate) on_clear: Vec<ClearHook>,
    pub(crate) single: Option<bool>,
    pub(crate) delay: Option<Duration>,
    pub(crate) resource: Option<Resource>,
}

impl TaskOptions {
    /// Empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the callback.
    pub fn callback<F, R>(mut self, f: F) -> Self
    where
        F: FnMut(Payload) -> R + Send + 'static,
        R: Into<Outcome>,
    {
        self.callback = Some(callback(f));
        self
    }

    /// Label collision policy.
    pub fn join(mut self, join: impl Into<Join>) -> Self {
        self.join = join.into();
        self
    }

    /// Label enforcing at most one live task within the scope.
    pub fn label(mut self, label: impl Into<Key>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Group for bulk operations.
    pub fn group(mut self, group: impl Into<Key>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Add a hook run when the task is cancelled before completing.
    pub fn on_clear<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&ClearContext) + Send + 'static,
    {
        self.on_clear.push(Box::new(hook));
        self
    }

    /// One-shot flag for listeners and proxies.
    pub fn single(mut self, single: bool) -> Self {
        self.single = Some(single);
        self
    }

    /// Timer delay or interval period.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Native resource managed by the task.
    pub fn resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }
}

/// Either a plain callback or full options.
pub enum Descriptor {
    /// Callback with default options.
    Plain(Callback),
    /// Full options.
    Options(TaskOptions),
}

impl Descriptor {
    pub(crate) fn into_options(self) -> TaskOptions {
        match self {
            Self::Plain(callback) => TaskOptions {
                callback: Some(callback),
                ..TaskOptions::default()
            },
            Self::Options(options) => options,
        }
    }
}

impl From<Callback> for Descriptor {
    fn from(callback: Callback) -> Self {
        Self::Plain(callback)
    }
}

impl From<TaskOptions> for Descriptor {
    fn from(options: TaskOptions) -> Self {
        Self::Options(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_accepts_unit_and_values() {
        let mut unit = callback(|_| ());
        assert!(matches!(unit(Payload::Null), Outcome::Value(Payload::Null)));

        let mut echo = callback(|p| p);
        match echo(serde_json::json!(3)) {
            Outcome::Value(v) => assert_eq!(v, serde_json::json!(3)),
            other => panic!("expected Value, got {other:?}"),
        }

        let mut failing = callback(|_| Err::<Payload, String>("boom".to_owned()));
        assert!(matches!(failing(Payload::Null), Outcome::Failed(ref e) if e == "boom"));
    }

    #[test]
    fn join_from_bool() {
        assert_eq!(Join::from(true), Join::Keep);
        assert_eq!(Join::from(false), Join::Supersede);
        assert_eq!(Join::default(), Join::Supersede);
    }

    #[test]
    fn plain_descriptor_resolves_to_default_options() {
        let options = Descriptor::from(callback(|_| ())).into_options();
        assert!(options.callback.is_some());
        assert!(options.label.is_none());
        assert!(options.group.is_none());
        assert_eq!(options.join, Join::Supersede);
    }

    #[test]
    fn options_builder_sets_fields() {
        let options = TaskOptions::new()
            .label("validate")
            .group("form")
            .join(Join::Replace)
            .single(true)
            .delay(Duration::from_millis(10))
            .on_clear(|_| {});
        assert_eq!(options.label, Some(Key::from("validate")));
        assert_eq!(options.group, Some(Key::from("form")));
        assert_eq!(options.join, Join::Replace);
        assert_eq!(options.single, Some(true));
        assert_eq!(options.delay, Some(Duration::from_millis(10)));
        assert_eq!(options.on_clear.len(), 1);
    }

    #[test]
    fn clear_context_display_lists_scope() {
        let ctx = ClearContext {
            id: TaskId::from_raw(4),
            kind: TaskKind::Timeout,
            label: Some(Key::from("poll")),
            group: Some(Key::from("net")),
            replaced_by: Some(TaskId::from_raw(5)),
            reason: ClearReason::Replaced,
        };
        assert_eq!(
            ctx.to_string(),
            "task#4 (timeout, label=poll, group=net, replaced by task#5)"
        );
    }
}
