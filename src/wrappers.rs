//! Future-returning wrappers over the registry.
//!
//! Each wrapper schedules an ordinary task with a waiter attached. The
//! returned [`TaskFuture`] settles with the task's outcome, or with
//! [`TaskError::Cancelled`] when the task is cancelled first. A
//! [`Join::Replace`](crate::Join::Replace) hand-off carries the waiter over
//! to the replacement instead.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::oneshot;

use crate::emitter::EventEmitter;
use crate::error::{RegistryError, TaskError};
use crate::kind::TaskKind;
use crate::native::Abort;
use crate::registry::Registry;
use crate::task::{Outcome, Payload, Resource, TaskId, TaskOptions};

enum Pending {
    Waiting(oneshot::Receiver<Result<Payload, TaskError>>),
    Rejected(Option<RegistryError>),
}

/// Outcome of a registry task, as a future.
#[must_use = "futures do nothing unless awaited"]
pub struct TaskFuture {
    id: Option<TaskId>,
    pending: Pending,
}

impl TaskFuture {
    fn rejected(err: RegistryError) -> Self {
        Self {
            id: None,
            pending: Pending::Rejected(Some(err)),
        }
    }

    fn ready(value: Payload) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(value));
        Self {
            id: None,
            pending: Pending::Waiting(rx),
        }
    }

    /// Id of the backing task; `None` if scheduling failed or no task was
    /// needed.
    pub fn id(&self) -> Option<TaskId> {
        self.id
    }
}

impl Future for TaskFuture {
    type Output = Result<Payload, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.pending {
            Pending::Waiting(rx) => rx
                .poll_unpin(cx)
                .map(|settled| settled.unwrap_or(Err(TaskError::Dropped))),
            Pending::Rejected(err) => {
                Poll::Ready(Err(err.take().map_or(TaskError::Dropped, TaskError::Schedule)))
            }
        }
    }
}

impl std::fmt::Debug for TaskFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture").field("id", &self.id).finish()
    }
}

fn identity(options: TaskOptions) -> TaskOptions {
    if options.callback.is_some() {
        options
    } else {
        options.callback(|payload| payload)
    }
}

impl Registry {
    fn waiter(&self, kind: TaskKind, options: TaskOptions) -> TaskFuture {
        let (tx, rx) = oneshot::channel();
        match self.schedule_with(kind, options, vec![tx]) {
            Ok(id) => TaskFuture {
                id: Some(id),
                pending: Pending::Waiting(rx),
            },
            Err(e) => TaskFuture::rejected(e),
        }
    }

    /// Resolve after `duration`.
    ///
    /// Without a callback the future resolves with `null`.
    pub fn sleep(&self, duration: Duration, options: TaskOptions) -> TaskFuture {
        self.waiter(TaskKind::Timeout, identity(options).delay(duration))
    }

    /// Resolve on the next scheduler turn.
    pub fn next_tick(&self, options: TaskOptions) -> TaskFuture {
        self.waiter(TaskKind::Immediate, identity(options))
    }

    /// Resolve once the host is idle, with `{"did_timeout": false}`.
    pub fn idle(&self, options: TaskOptions) -> TaskFuture {
        self.waiter(TaskKind::IdleCallback, identity(options))
    }

    /// Resolve on the next frame with the milliseconds elapsed since the
    /// registry was created.
    pub fn animation_frame(&self, options: TaskOptions) -> TaskFuture {
        self.waiter(TaskKind::AnimationFrame, identity(options))
    }

    /// Resolve with `true` once `predicate` holds.
    ///
    /// The predicate is checked immediately, then every
    /// `wait_poll_interval_ms` by an interval that retires itself.
    pub fn wait<P>(&self, mut predicate: P, options: TaskOptions) -> TaskFuture
    where
        P: FnMut() -> bool + Send + 'static,
    {
        if self.is_destroyed() {
            return TaskFuture::rejected(RegistryError::Destroyed);
        }
        if predicate() {
            return TaskFuture::ready(Payload::Bool(true));
        }
        let period = Duration::from_millis(self.config().wait_poll_interval_ms);
        let options = options.delay(period).callback(move |_| {
            if predicate() {
                Outcome::Finish(Payload::Bool(true))
            } else {
                Outcome::Continue
            }
        });
        self.waiter(TaskKind::Interval, options)
    }

    /// Resolve with the payload of the next `event` on `emitter`.
    pub fn promisify_once(
        &self,
        emitter: Arc<dyn EventEmitter>,
        event: &str,
        options: TaskOptions,
    ) -> TaskFuture {
        let options = identity(options).single(true).resource(Resource::Listener {
            emitter,
            event: event.to_owned(),
        });
        self.waiter(TaskKind::EventListener, options)
    }

    /// Track an existing future as a cancellable proxy task.
    ///
    /// A callback in `options` maps the future's value before it resolves.
    pub fn promise<F>(&self, future: F, options: TaskOptions) -> TaskFuture
    where
        F: Future<Output = Result<Payload, String>> + Send + 'static,
    {
        let options = options.resource(Resource::Future(future.boxed()));
        self.waiter(TaskKind::Proxy, options)
    }

    /// Drive a request future as a cancellable task.
    pub fn request<F>(&self, future: F, options: TaskOptions) -> TaskFuture
    where
        F: Future<Output = Result<Payload, String>> + Send + 'static,
    {
        let options = options.resource(Resource::Request {
            future: future.boxed(),
            abort: None,
        });
        self.waiter(TaskKind::Request, options)
    }

    /// Like [`request`](Self::request), calling `abort` when the request is
    /// cancelled before it settles.
    pub fn request_abortable<F>(
        &self,
        future: F,
        abort: impl Abort,
        options: TaskOptions,
    ) -> TaskFuture
    where
        F: Future<Output = Result<Payload, String>> + Send + 'static,
    {
        let options = options.resource(Resource::Request {
            future: future.boxed(),
            abort: Some(Box::new(abort)),
        });
        self.waiter(TaskKind::Request, options)
    }

    /// Await the next outcome of an already scheduled task.
    pub fn completion(&self, kind: TaskKind, id: TaskId) -> TaskFuture {
        let (tx, rx) = oneshot::channel();
        match self.attach_waiter(kind, id, tx) {
            Ok(()) => TaskFuture {
                id: Some(id),
                pending: Pending::Waiting(rx),
            },
            Err(e) => TaskFuture::rejected(e),
        }
    }
}
