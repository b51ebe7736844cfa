//! Per-kind adapters: how each native primitive is started and stopped.
//!
//! Timer-like kinds run as tokio tasks racing a [`CancellationToken`]
//! against their timer; cancelling the token is their native cancel. Workers,
//! requests and listeners delegate to the handle the caller supplied.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::emitter::{EventEmitter, Listener, ListenerId};
use crate::error::AdapterError;
use crate::kind::TaskKind;
use crate::registry::{Dispatcher, Fired, Invocation};
use crate::task::{ClearContext, Payload, Resource};

/// Handle to a separate execution context, terminated on cancel.
pub trait Worker: Send + 'static {
    /// Stop the worker.
    fn terminate(&mut self) -> Result<(), AdapterError>;
}

impl<T: Send + 'static> Worker for tokio::task::JoinHandle<T> {
    fn terminate(&mut self) -> Result<(), AdapterError> {
        self.abort();
        Ok(())
    }
}

impl Worker for tokio::task::AbortHandle {
    fn terminate(&mut self) -> Result<(), AdapterError> {
        tokio::task::AbortHandle::abort(self);
        Ok(())
    }
}

impl Worker for CancellationToken {
    fn terminate(&mut self) -> Result<(), AdapterError> {
        if self.is_cancelled() {
            return Err(AdapterError::AlreadyReleased(
                "cancellation token".to_owned(),
            ));
        }
        self.cancel();
        Ok(())
    }
}

/// Abort operation of an in-flight request.
pub trait Abort: Send + 'static {
    /// Abort the request; `reason` describes the cancellation.
    fn abort(&mut self, reason: &ClearContext) -> Result<(), AdapterError>;
}

impl Abort for CancellationToken {
    fn abort(&mut self, _reason: &ClearContext) -> Result<(), AdapterError> {
        self.cancel();
        Ok(())
    }
}

impl Abort for tokio::task::AbortHandle {
    fn abort(&mut self, _reason: &ClearContext) -> Result<(), AdapterError> {
        tokio::task::AbortHandle::abort(self);
        Ok(())
    }
}

/// Live native resource owned by a task.
pub(crate) enum Native {
    /// Timer-like tokio task, or a future driven for a proxy.
    Spawned(CancellationToken),
    /// Request future plus the caller's abort hook.
    Request {
        token: CancellationToken,
        abort: Option<Box<dyn Abort>>,
    },
    Worker(Box<dyn Worker>),
    Listener {
        emitter: Arc<dyn EventEmitter>,
        event: String,
        listener: ListenerId,
        native_once: bool,
    },
    /// Pure bookkeeping.
    Detached,
}

impl Native {
    /// Cancel path: the task left the registry before completing.
    pub(crate) fn stop(self, ctx: &ClearContext) -> Result<(), AdapterError> {
        match self {
            Self::Spawned(token) => {
                token.cancel();
                Ok(())
            }
            Self::Request { token, abort } => {
                token.cancel();
                match abort {
                    Some(mut abort) => abort.abort(ctx),
                    None => Ok(()),
                }
            }
            Self::Worker(mut worker) => worker.terminate(),
            Self::Listener {
                emitter,
                event,
                listener,
                ..
            } => emitter.remove_listener(&event, listener),
            Self::Detached => Ok(()),
        }
    }

    /// Completion path: the task fired (one-shot) or finished (recurring).
    pub(crate) fn release(self) -> Result<(), AdapterError> {
        match self {
            Self::Spawned(token) | Self::Request { token, .. } => {
                token.cancel();
                Ok(())
            }
            Self::Worker(mut worker) => worker.terminate(),
            Self::Listener {
                native_once: true, ..
            } => Ok(()),
            Self::Listener {
                emitter,
                event,
                listener,
                ..
            } => emitter.remove_listener(&event, listener),
            Self::Detached => Ok(()),
        }
    }
}

/// Everything an adapter needs to start one task.
pub(crate) struct Start {
    pub kind: TaskKind,
    pub resource: Option<Resource>,
    pub delay: Duration,
    pub single: bool,
    pub runtime: Option<Handle>,
    pub frame_interval: Duration,
    pub idle_delay: Duration,
    pub epoch: Instant,
}

/// Start the native primitive for `start.kind`; `dispatcher` fires the task.
pub(crate) fn start(start: Start, dispatcher: Dispatcher) -> Native {
    let Start {
        kind,
        resource,
        delay,
        single,
        runtime,
        frame_interval,
        idle_delay,
        epoch,
    } = start;

    match resource {
        Some(Resource::Worker(worker)) => return Native::Worker(worker),
        Some(Resource::Listener { emitter, event }) => {
            return attach_listener(emitter, event, single, dispatcher);
        }
        _ => {}
    }

    let Some(runtime) = runtime else {
        if kind.needs_runtime() {
            warn!(kind = %kind, "no tokio runtime captured; task will never fire");
        }
        return Native::Detached;
    };

    let token = CancellationToken::new();
    match (kind, resource) {
        (TaskKind::Request, Some(Resource::Request { future, abort })) => {
            spawn_future(&runtime, token.clone(), future, dispatcher);
            Native::Request { token, abort }
        }
        (_, Some(Resource::Future(future))) => {
            spawn_future(&runtime, token.clone(), future, dispatcher);
            Native::Spawned(token)
        }
        (TaskKind::Timeout, _) => {
            spawn_delayed(&runtime, token.clone(), delay, dispatcher, || Payload::Null);
            Native::Spawned(token)
        }
        (TaskKind::Interval, _) => {
            spawn_interval(&runtime, token.clone(), delay, dispatcher);
            Native::Spawned(token)
        }
        (TaskKind::Immediate, _) => {
            spawn_immediate(&runtime, token.clone(), dispatcher);
            Native::Spawned(token)
        }
        (TaskKind::AnimationFrame, _) => {
            spawn_delayed(&runtime, token.clone(), frame_interval, dispatcher, move || {
                let elapsed = u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
                Payload::from(elapsed)
            });
            Native::Spawned(token)
        }
        (TaskKind::IdleCallback, _) => {
            spawn_delayed(&runtime, token.clone(), idle_delay, dispatcher, || {
                serde_json::json!({ "did_timeout": false })
            });
            Native::Spawned(token)
        }
        _ => Native::Detached,
    }
}

fn attach_listener(
    emitter: Arc<dyn EventEmitter>,
    event: String,
    single: bool,
    dispatcher: Dispatcher,
) -> Native {
    let native_once = single && emitter.supports_once();
    let listener: Listener = Arc::new(move |payload: &Payload| {
        dispatcher.fire(Invocation::Call(payload.clone()));
    });
    let listener = emitter.add_listener(&event, listener, native_once);
    Native::Listener {
        emitter,
        event,
        listener,
        native_once,
    }
}

fn spawn_delayed<P>(
    runtime: &Handle,
    token: CancellationToken,
    delay: Duration,
    dispatcher: Dispatcher,
    payload: P,
) where
    P: FnOnce() -> Payload + Send + 'static,
{
    runtime.spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                dispatcher.fire(Invocation::Call(payload()));
            }
        }
    });
}

fn spawn_immediate(runtime: &Handle, token: CancellationToken, dispatcher: Dispatcher) {
    runtime.spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::task::yield_now() => {
                dispatcher.fire(Invocation::Call(Payload::Null));
            }
        }
    });
}

fn spawn_interval(
    runtime: &Handle,
    token: CancellationToken,
    period: Duration,
    dispatcher: Dispatcher,
) {
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let fired = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        dispatcher.fire(Invocation::Call(Payload::Null))
                    }));
                    match fired {
                        Ok(Fired::Live) => {}
                        Ok(_) => break,
                        Err(_) => warn!("interval callback panicked; next tick still scheduled"),
                    }
                }
            }
        }
    });
}

fn spawn_future(
    runtime: &Handle,
    token: CancellationToken,
    future: futures_util::future::BoxFuture<'static, Result<Payload, String>>,
    dispatcher: Dispatcher,
) {
    runtime.spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = future => {
                dispatcher.fire(Invocation::Settle(result));
            }
        }
    });
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::emitter::EventBus;
    use crate::key::Key;
    use crate::task::{ClearReason, TaskId};

    fn ctx() -> ClearContext {
        ClearContext {
            id: TaskId::from_raw(1),
            kind: TaskKind::Worker,
            label: None,
            group: Some(Key::from("workers")),
            replaced_by: None,
            reason: ClearReason::Cancelled,
        }
    }

    #[test]
    fn token_worker_rejects_double_terminate() {
        let token = CancellationToken::new();
        let mut worker = token.clone();
        worker.terminate().unwrap();
        assert!(token.is_cancelled());
        assert!(matches!(
            worker.terminate(),
            Err(AdapterError::AlreadyReleased(_))
        ));
    }

    #[tokio::test]
    async fn join_handle_worker_aborts_task() {
        let mut handle = tokio::spawn(std::future::pending::<()>());
        handle.terminate().unwrap();
        let err = (&mut handle).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn stop_request_cancels_token_and_aborts() {
        let token = CancellationToken::new();
        let abort_token = CancellationToken::new();
        let native = Native::Request {
            token: token.clone(),
            abort: Some(Box::new(abort_token.clone())),
        };
        native.stop(&ctx()).unwrap();
        assert!(token.is_cancelled());
        assert!(abort_token.is_cancelled());
    }

    #[test]
    fn release_request_does_not_abort() {
        let token = CancellationToken::new();
        let abort_token = CancellationToken::new();
        let native = Native::Request {
            token: token.clone(),
            abort: Some(Box::new(abort_token.clone())),
        };
        native.release().unwrap();
        assert!(token.is_cancelled());
        assert!(!abort_token.is_cancelled());
    }

    #[test]
    fn release_skips_native_once_listener() {
        let bus = Arc::new(EventBus::with_native_once());
        let listener = bus.add_listener("ready", Arc::new(|_| {}), true);
        let native = Native::Listener {
            emitter: bus.clone(),
            event: "ready".to_owned(),
            listener,
            native_once: true,
        };
        native.release().unwrap();
        assert_eq!(bus.listener_count("ready"), 1);
    }

    #[test]
    fn stop_listener_detaches_it() {
        let bus = Arc::new(EventBus::new());
        let listener = bus.add_listener("click", Arc::new(|_| {}), false);
        let native = Native::Listener {
            emitter: bus.clone(),
            event: "click".to_owned(),
            listener,
            native_once: false,
        };
        native.stop(&ctx()).unwrap();
        assert_eq!(bus.listener_count("click"), 0);
    }
}
