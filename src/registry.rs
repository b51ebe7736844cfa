//! Registration and cancellation engine.
//!
//! [`Registry`] owns one [`Cache`] per instance. Native primitives hold a
//! [`Dispatcher`], a weak back-reference plus the task's address, and resolve
//! the live task by id every time they fire. A task that has left the cache
//! turns its dispatcher into a no-op.
//!
//! The cache lock is never held while caller code runs: callbacks, `on_clear`
//! hooks and native stop operations all run after the lock is released, so
//! they may schedule or cancel tasks themselves.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::cache::{Cache, Completer, Task, TaskKey};
use crate::config::RegistryConfig;
use crate::emitter::EventEmitter;
use crate::error::{RegistryError, Result, TaskError};
use crate::key::{Key, Selector};
use crate::kind::TaskKind;
use crate::native::{self, Native, Start, Worker};
use crate::task::{
    Callback, ClearContext, ClearReason, Descriptor, Join, Outcome, Payload, Resource, TaskId,
    TaskOptions,
};

/// What reaches a task when its native primitive fires.
pub(crate) enum Invocation {
    /// Run the callback with this payload.
    Call(Payload),
    /// A driven future settled.
    Settle(std::result::Result<Payload, String>),
}

/// Result of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fired {
    /// The task is still registered.
    Live,
    /// The task completed and left the registry.
    Retired,
    /// No live task: cancelled, already fired, or registry dropped.
    Gone,
}

/// Weak handle used by native primitives to fire their task.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    shared: Weak<Shared>,
    key: TaskKey,
}

impl Dispatcher {
    pub(crate) fn fire(&self, invocation: Invocation) -> Fired {
        match self.shared.upgrade() {
            Some(shared) => shared.dispatch(&self.key, invocation),
            None => Fired::Gone,
        }
    }
}

#[derive(Default)]
struct State {
    cache: Cache,
    destroyed: bool,
}

pub(crate) struct Shared {
    state: Mutex<State>,
    config: RegistryConfig,
    next_id: AtomicU64,
    epoch: tokio::time::Instant,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dispatch(&self, key: &TaskKey, invocation: Invocation) -> Fired {
        let mut state = self.lock();
        let Some(task) = state.cache.task_mut(key) else {
            trace!(kind = %key.kind, id = %key.id, "dispatch for a task that is no longer live");
            return Fired::Gone;
        };

        if task.suspended {
            task.queued.push(invocation);
            return Fired::Live;
        }

        if !task.recurring {
            let Some(mut task) = state.cache.remove(key) else {
                return Fired::Gone;
            };
            drop(state);
            if let Some(native) = task.native.take() {
                release(native, key);
            }
            let outcome = invoke(task.callback.as_mut(), invocation);
            settle(std::mem::take(&mut task.waiters), outcome);
            return Fired::Retired;
        }

        let Some(mut callback) = task.callback.take() else {
            trace!(kind = %key.kind, id = %key.id, "re-entrant invocation of a running task dropped");
            return Fired::Live;
        };
        drop(state);

        let run = std::panic::catch_unwind(AssertUnwindSafe(|| {
            invoke(Some(&mut callback), invocation)
        }));
        let outcome = match run {
            Ok(outcome) => outcome,
            Err(panic) => {
                if let Some(task) = self.lock().cache.task_mut(key) {
                    task.callback = Some(callback);
                }
                std::panic::resume_unwind(panic);
            }
        };

        let mut state = self.lock();
        match outcome {
            Outcome::Continue => {
                if let Some(task) = state.cache.task_mut(key) {
                    task.callback = Some(callback);
                    Fired::Live
                } else {
                    Fired::Gone
                }
            }
            Outcome::Finish(value) => {
                let retired = state.cache.remove(key);
                drop(state);
                let Some(mut task) = retired else {
                    return Fired::Gone;
                };
                debug!(kind = %key.kind, id = %key.id, "recurring task finished");
                if let Some(native) = task.native.take() {
                    release(native, key);
                }
                settle(std::mem::take(&mut task.waiters), Outcome::Value(value));
                Fired::Retired
            }
            outcome => {
                let Some(task) = state.cache.task_mut(key) else {
                    return Fired::Gone;
                };
                task.callback = Some(callback);
                let waiters = std::mem::take(&mut task.waiters);
                drop(state);
                settle(waiters, outcome);
                Fired::Live
            }
        }
    }

    /// Run the cancel path for a task that was already removed from the cache.
    fn clear(&self, mut task: Task, ctx: ClearContext) {
        debug!(
            kind = %ctx.kind,
            id = %ctx.id,
            reason = ?ctx.reason,
            label = ctx.label.as_ref().map(tracing::field::display),
            group = ctx.group.as_ref().map(tracing::field::display),
            "task cleared"
        );
        for hook in task.on_clear.drain(..) {
            hook(&ctx);
        }
        let waiters = std::mem::take(&mut task.waiters);
        resolve_all(waiters, Err(TaskError::Cancelled(ctx.clone())));
        if let Some(native) = task.native.take() {
            if let Err(e) = native.stop(&ctx) {
                debug!(kind = %ctx.kind, id = %ctx.id, "native stop failed: {e}");
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        for mut task in state.cache.drain() {
            if let Some(native) = task.native.take() {
                let ctx = task.context(ClearReason::Teardown, None);
                let _ = native.stop(&ctx);
            }
        }
    }
}

fn release(native: Native, key: &TaskKey) {
    if let Err(e) = native.release() {
        debug!(kind = %key.kind, id = %key.id, "native release failed: {e}");
    }
}

fn invoke(callback: Option<&mut Callback>, invocation: Invocation) -> Outcome {
    match (invocation, callback) {
        (Invocation::Call(payload), Some(callback)) => callback(payload),
        (Invocation::Call(payload), None) => Outcome::Value(payload),
        (Invocation::Settle(Ok(value)), Some(callback)) => callback(value),
        (Invocation::Settle(Ok(value)), None) => Outcome::Value(value),
        (Invocation::Settle(Err(e)), _) => Outcome::Failed(e),
    }
}

fn settle(waiters: Vec<Completer>, outcome: Outcome) {
    match outcome {
        Outcome::Value(value) | Outcome::Finish(value) => resolve_all(waiters, Ok(value)),
        Outcome::Continue => resolve_all(waiters, Ok(Payload::Null)),
        Outcome::Failed(e) => resolve_all(waiters, Err(TaskError::Failed(e))),
        Outcome::Deferred(future) => match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let result = future.await.map_err(TaskError::Failed);
                    resolve_all(waiters, result);
                });
            }
            Err(_) => warn!("deferred outcome dropped: no tokio runtime to drive it"),
        },
    }
}

fn resolve_all(waiters: Vec<Completer>, result: std::result::Result<Payload, TaskError>) {
    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}

fn check_resource(kind: TaskKind, options: &TaskOptions) -> Result<()> {
    let needs_callback = match (kind, &options.resource) {
        (TaskKind::Worker, Some(Resource::Worker(_)))
        | (TaskKind::Request, Some(Resource::Request { .. }))
        | (TaskKind::Proxy, Some(Resource::Future(_))) => false,
        (TaskKind::EventListener, Some(Resource::Listener { .. })) => true,
        (TaskKind::Worker | TaskKind::Request | TaskKind::EventListener, None) => {
            return Err(RegistryError::InvalidDescriptor {
                kind,
                reason: "a native resource is required".to_owned(),
            });
        }
        (_, Some(resource)) => {
            return Err(RegistryError::ResourceMismatch {
                kind,
                resource: resource.name(),
            });
        }
        (_, None) => true,
    };

    if needs_callback && options.callback.is_none() {
        return Err(RegistryError::MissingCallback(kind));
    }
    if kind == TaskKind::Interval && options.delay.is_none_or(|d| d.is_zero()) {
        return Err(RegistryError::InvalidDescriptor {
            kind,
            reason: "interval period must be greater than zero".to_owned(),
        });
    }
    Ok(())
}

/// Live task counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Live tasks per kind; kinds without tasks are omitted.
    pub per_kind: BTreeMap<TaskKind, usize>,
    /// Live tasks across every kind.
    pub total: usize,
    /// Non-empty group scopes across every kind.
    pub groups: usize,
}

/// Cancellable task and resource registry.
///
/// Clones share the same registry. Dropping the last clone stops every
/// native resource still registered.
#[derive(Clone)]
pub struct Registry {
    pub(crate) shared: Arc<Shared>,
}

/// Non-owning registry handle for callbacks stored inside the registry.
#[derive(Clone)]
pub struct WeakRegistry {
    shared: Weak<Shared>,
}

impl WeakRegistry {
    /// The registry, if it is still alive.
    pub fn upgrade(&self) -> Option<Registry> {
        self.shared.upgrade().map(|shared| Registry { shared })
    }
}

/// Callable handle of a proxy task.
#[derive(Clone)]
pub struct Proxy {
    id: TaskId,
    dispatcher: Dispatcher,
}

impl Proxy {
    /// Id of the proxy task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Invoke the wrapped callback.
    ///
    /// Returns `false` when the proxy was cancelled or, for one-shot proxies,
    /// already called.
    pub fn call(&self, payload: Payload) -> bool {
        self.dispatcher.fire(Invocation::Call(payload)) != Fired::Gone
    }
}

impl Registry {
    /// Registry with the default configuration.
    pub fn new() -> Self {
        Self::build(RegistryConfig::default())
    }

    /// Registry with a validated configuration.
    pub fn with_config(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RegistryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                config,
                next_id: AtomicU64::new(1),
                epoch: tokio::time::Instant::now(),
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Schedule a task of `kind`.
    ///
    /// With a label already held in the target scope, [`Join::Keep`] returns
    /// the existing id without starting anything; otherwise the existing task
    /// is cancelled before the new one starts.
    ///
    /// # Errors
    ///
    /// Fails fast on a missing callback, a missing or mismatched resource, a
    /// zero interval period, a missing tokio runtime for runtime-driven kinds,
    /// and on a destroyed registry.
    pub fn schedule(&self, kind: TaskKind, descriptor: impl Into<Descriptor>) -> Result<TaskId> {
        self.schedule_with(kind, descriptor.into().into_options(), Vec::new())
    }

    pub(crate) fn schedule_with(
        &self,
        kind: TaskKind,
        mut options: TaskOptions,
        mut waiters: Vec<Completer>,
    ) -> Result<TaskId> {
        check_resource(kind, &options)?;

        let needs_runtime = kind.needs_runtime()
            || matches!(options.resource, Some(Resource::Future(_)));
        let runtime = if needs_runtime {
            Some(Handle::try_current().map_err(|_| RegistryError::NoRuntime(kind))?)
        } else {
            None
        };

        let group = options.group.clone().or_else(|| match &options.resource {
            Some(Resource::Listener { event, .. }) => Some(Key::from(event.as_str())),
            _ => None,
        });
        let recurring = kind.is_recurring(options.single);
        let single = !recurring;
        let resource = options.resource.take();
        let config = &self.shared.config;
        let id = TaskId::from_raw(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let mut chain_depth = 0;

        loop {
            let mut state = self.shared.lock();
            if state.destroyed {
                return Err(RegistryError::Destroyed);
            }

            let existing = options
                .label
                .as_ref()
                .and_then(|label| state.cache.label_id(kind, group.as_ref(), label));

            if let Some(existing) = existing {
                let key = TaskKey {
                    kind,
                    group: group.clone(),
                    id: existing,
                };

                if options.join == Join::Keep {
                    if let Some(task) = state.cache.task_mut(&key) {
                        task.waiters.append(&mut waiters);
                    }
                    debug!(kind = %kind, id = %existing, "joined existing task");
                    return Ok(existing);
                }

                let Some(mut displaced) = state.cache.remove(&key) else {
                    continue;
                };
                drop(state);

                let replace = options.join == Join::Replace;
                let ctx = if replace {
                    displaced.context(ClearReason::Replaced, Some(id))
                } else {
                    displaced.context(ClearReason::Superseded, None)
                };
                if replace {
                    if displaced.chain_depth < config.max_replace_chain {
                        chain_depth = chain_depth.max(displaced.chain_depth + 1);
                        waiters.append(&mut displaced.waiters);
                    } else {
                        warn!(
                            kind = %kind,
                            id = %existing,
                            depth = displaced.chain_depth,
                            "replace chain bound reached; waiters are rejected instead of chained"
                        );
                    }
                }
                self.shared.clear(displaced, ctx);
                continue;
            }

            let key = TaskKey {
                kind,
                group: group.clone(),
                id,
            };
            let label = options.label.clone();
            state.cache.insert(Task {
                id,
                kind,
                label: options.label,
                group: group.clone(),
                recurring,
                callback: options.callback,
                on_clear: options.on_clear,
                waiters,
                native: None,
                chain_depth,
                suspended: false,
                queued: Vec::new(),
            });
            drop(state);

            // Emitters may deliver synchronously from `add_listener`.
            let native = native::start(
                Start {
                    kind,
                    resource,
                    delay: options.delay.unwrap_or(Duration::ZERO),
                    single,
                    runtime,
                    frame_interval: Duration::from_millis(config.frame_interval_ms),
                    idle_delay: Duration::from_millis(config.idle_delay_ms),
                    epoch: self.shared.epoch,
                },
                Dispatcher {
                    shared: Arc::downgrade(&self.shared),
                    key: key.clone(),
                },
            );

            let mut state = self.shared.lock();
            if let Some(task) = state.cache.task_mut(&key) {
                task.native = Some(native);
                debug!(kind = %kind, id = %id, recurring, "task scheduled");
                return Ok(id);
            }

            // Fired or cancelled while the native resource was starting.
            let reason = if state.destroyed {
                ClearReason::Teardown
            } else {
                ClearReason::Cancelled
            };
            drop(state);
            let ctx = ClearContext {
                id,
                kind,
                label,
                group,
                replaced_by: None,
                reason,
            };
            if let Err(e) = native.stop(&ctx) {
                debug!(kind = %kind, id = %id, "native stop failed: {e}");
            }
            debug!(kind = %kind, id = %id, "task left the registry while starting");
            return Ok(id);
        }
    }

    /// Attach a waiter to a live task.
    pub(crate) fn attach_waiter(&self, kind: TaskKind, id: TaskId, waiter: Completer) -> Result<()> {
        let mut state = self.shared.lock();
        let key = state
            .cache
            .locate(kind, id)
            .ok_or(RegistryError::UnknownTask(id))?;
        let task = state
            .cache
            .task_mut(&key)
            .ok_or(RegistryError::UnknownTask(id))?;
        task.waiters.push(waiter);
        Ok(())
    }

    /// Cancel the tasks of `kind` designated by `selector`.
    ///
    /// Returns how many tasks were cancelled. Unknown or already settled ids
    /// are ignored.
    pub fn cancel(&self, kind: TaskKind, selector: impl Into<Selector>) -> usize {
        let selector = selector.into();
        let removed: Vec<Task> = {
            let mut state = self.shared.lock();
            let keys = state.cache.select(kind, &selector);
            keys.iter()
                .filter_map(|key| state.cache.remove(key))
                .collect()
        };

        let count = removed.len();
        for task in removed {
            let ctx = task.context(ClearReason::Cancelled, None);
            self.shared.clear(task, ctx);
        }
        count
    }

    /// Cancel every task of one kind, or of every kind when `kind` is `None`.
    pub fn cancel_all(&self, kind: Option<TaskKind>) -> usize {
        match kind {
            Some(kind) => self.cancel(kind, Selector::all()),
            None => TaskKind::ALL
                .iter()
                .map(|&kind| self.cancel(kind, Selector::all()))
                .sum(),
        }
    }

    /// Tear the registry down: cancel everything and refuse new tasks.
    ///
    /// Safe to call repeatedly.
    pub fn destroy(&self) {
        let tasks = {
            let mut state = self.shared.lock();
            state.destroyed = true;
            state.cache.drain()
        };
        if !tasks.is_empty() {
            debug!(count = tasks.len(), "registry destroyed");
        }
        for task in tasks {
            let ctx = task.context(ClearReason::Teardown, None);
            self.shared.clear(task, ctx);
        }
    }

    /// Whether [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.shared.lock().destroyed
    }

    /// Queue invocations of the selected tasks instead of running them.
    ///
    /// Returns how many tasks were suspended.
    pub fn suspend(&self, kind: TaskKind, selector: impl Into<Selector>) -> usize {
        let selector = selector.into();
        let mut state = self.shared.lock();
        let keys = state.cache.select(kind, &selector);
        let mut count = 0;
        for key in &keys {
            if let Some(task) = state.cache.task_mut(key) {
                if !task.suspended {
                    task.suspended = true;
                    count += 1;
                }
            }
        }
        count
    }

    /// Resume the selected tasks and replay their queued invocations in
    /// arrival order.
    ///
    /// Returns how many tasks were resumed.
    pub fn unsuspend(&self, kind: TaskKind, selector: impl Into<Selector>) -> usize {
        let selector = selector.into();
        let resumed: Vec<(TaskKey, Vec<Invocation>)> = {
            let mut state = self.shared.lock();
            let keys = state.cache.select(kind, &selector);
            keys.into_iter()
                .filter_map(|key| {
                    let task = state.cache.task_mut(&key)?;
                    if !task.suspended {
                        return None;
                    }
                    task.suspended = false;
                    Some((key, std::mem::take(&mut task.queued)))
                })
                .collect()
        };

        let count = resumed.len();
        for (key, queued) in resumed {
            for invocation in queued {
                if self.shared.dispatch(&key, invocation) != Fired::Live {
                    break;
                }
            }
        }
        count
    }

    /// Attach a timeout that fires once after `delay`.
    pub fn set_timeout(&self, descriptor: impl Into<Descriptor>, delay: Duration) -> Result<TaskId> {
        let options = descriptor.into().into_options().delay(delay);
        self.schedule(TaskKind::Timeout, options)
    }

    /// Attach an interval firing every `period`.
    pub fn set_interval(
        &self,
        descriptor: impl Into<Descriptor>,
        period: Duration,
    ) -> Result<TaskId> {
        let options = descriptor.into().into_options().delay(period);
        self.schedule(TaskKind::Interval, options)
    }

    /// Run on the next scheduler turn.
    pub fn set_immediate(&self, descriptor: impl Into<Descriptor>) -> Result<TaskId> {
        self.schedule(TaskKind::Immediate, descriptor)
    }

    /// Run on the next frame tick.
    pub fn request_animation_frame(&self, descriptor: impl Into<Descriptor>) -> Result<TaskId> {
        self.schedule(TaskKind::AnimationFrame, descriptor)
    }

    /// Run once the host is idle.
    pub fn request_idle_callback(&self, descriptor: impl Into<Descriptor>) -> Result<TaskId> {
        self.schedule(TaskKind::IdleCallback, descriptor)
    }

    /// Register a worker handle, terminated when the task is cancelled.
    pub fn worker(&self, worker: impl Worker, options: TaskOptions) -> Result<TaskId> {
        let options = options.resource(Resource::Worker(Box::new(worker)));
        self.schedule(TaskKind::Worker, options)
    }

    /// Attach a listener for `event`. The group defaults to the event name.
    pub fn on(
        &self,
        emitter: Arc<dyn EventEmitter>,
        event: &str,
        descriptor: impl Into<Descriptor>,
    ) -> Result<TaskId> {
        let options = descriptor.into().into_options().resource(Resource::Listener {
            emitter,
            event: event.to_owned(),
        });
        self.schedule(TaskKind::EventListener, options)
    }

    /// Attach a listener that detaches itself after the first event.
    pub fn once(
        &self,
        emitter: Arc<dyn EventEmitter>,
        event: &str,
        descriptor: impl Into<Descriptor>,
    ) -> Result<TaskId> {
        let options = descriptor.into().into_options().single(true);
        self.on(emitter, event, options)
    }

    /// Detach every listener of `event` registered in its default group.
    pub fn off(&self, event: &str) -> usize {
        self.cancel(TaskKind::EventListener, Selector::group(event))
    }

    /// Wrap a callback in a proxy task.
    ///
    /// Proxies are one-shot unless the options set `single(false)`.
    pub fn proxy(&self, descriptor: impl Into<Descriptor>) -> Result<Proxy> {
        let options = descriptor.into().into_options();
        let id = self.schedule(TaskKind::Proxy, options)?;
        let key = self
            .shared
            .lock()
            .cache
            .locate(TaskKind::Proxy, id)
            .ok_or(RegistryError::UnknownTask(id))?;
        Ok(Proxy {
            id,
            dispatcher: Dispatcher {
                shared: Arc::downgrade(&self.shared),
                key,
            },
        })
    }

    /// Number of live tasks of `kind`.
    pub fn len(&self, kind: TaskKind) -> usize {
        self.shared.lock().cache.len(kind)
    }

    /// Whether no task of any kind is live.
    pub fn is_empty(&self) -> bool {
        self.stats().total == 0
    }

    /// Number of live tasks of `kind` in `group`.
    pub fn group_len(&self, kind: TaskKind, group: &Key) -> usize {
        self.shared.lock().cache.group_len(kind, group)
    }

    /// Non-empty groups of `kind`.
    pub fn groups(&self, kind: TaskKind) -> Vec<Key> {
        self.shared.lock().cache.groups(kind)
    }

    /// Whether `id` is a live task of `kind`.
    pub fn contains(&self, kind: TaskKind, id: TaskId) -> bool {
        self.shared.lock().cache.locate(kind, id).is_some()
    }

    /// Id of the live task holding `label` in the given scope.
    pub fn label_id(&self, kind: TaskKind, group: Option<&Key>, label: &Key) -> Option<TaskId> {
        self.shared.lock().cache.label_id(kind, group, label)
    }

    /// Live task counts.
    pub fn stats(&self) -> RegistryStats {
        let state = self.shared.lock();
        let per_kind: BTreeMap<TaskKind, usize> = TaskKind::ALL
            .iter()
            .map(|&kind| (kind, state.cache.len(kind)))
            .filter(|(_, n)| *n > 0)
            .collect();
        RegistryStats {
            total: per_kind.values().sum(),
            per_kind,
            groups: state.cache.group_count(),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("stats", &self.stats())
            .field("config", &self.shared.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::emitter::EventBus;
    use crate::task::callback;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut(Payload) + Send + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&hits);
        (hits, move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn timer_kinds_fail_fast_without_runtime() {
        let registry = Registry::new();
        let err = registry
            .set_timeout(callback(|_| ()), Duration::from_millis(5))
            .unwrap_err();
        assert!(matches!(err, RegistryError::NoRuntime(TaskKind::Timeout)));
    }

    #[test]
    fn missing_callback_is_rejected() {
        let registry = Registry::new();
        let err = registry
            .schedule(TaskKind::Proxy, TaskOptions::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingCallback(TaskKind::Proxy)));
    }

    #[test]
    fn mismatched_resource_is_rejected() {
        let registry = Registry::new();
        let options = TaskOptions::new()
            .callback(|_| ())
            .resource(Resource::Worker(Box::new(tokio_util::sync::CancellationToken::new())));
        let err = registry.schedule(TaskKind::Proxy, options).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::ResourceMismatch {
                kind: TaskKind::Proxy,
                resource: "worker"
            }
        ));
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let registry = Registry::new();
        let err = registry
            .set_interval(callback(|_| ()), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDescriptor { .. }));
    }

    #[test]
    fn proxy_is_one_shot_by_default() {
        let registry = Registry::new();
        let (hits, f) = counter();
        let proxy = registry.proxy(callback(f)).unwrap();
        assert!(registry.contains(TaskKind::Proxy, proxy.id()));

        assert!(proxy.call(Payload::Null));
        assert!(!proxy.call(Payload::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!registry.contains(TaskKind::Proxy, proxy.id()));
    }

    #[test]
    fn recurring_proxy_stays_live() {
        let registry = Registry::new();
        let (hits, f) = counter();
        let proxy = registry
            .proxy(TaskOptions::new().callback(f).single(false))
            .unwrap();
        for _ in 0..3 {
            assert!(proxy.call(Payload::Null));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(registry.len(TaskKind::Proxy), 1);
    }

    #[test]
    fn keep_join_returns_existing_id() {
        let registry = Registry::new();
        let (first_hits, f1) = counter();
        let (second_hits, f2) = counter();
        let a = registry
            .proxy(TaskOptions::new().callback(f1).label("only").join(true))
            .unwrap();
        let b = registry
            .proxy(TaskOptions::new().callback(f2).label("only").join(true))
            .unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(registry.len(TaskKind::Proxy), 1);

        assert!(b.call(Payload::Null));
        assert_eq!(first_hits.load(Ordering::SeqCst), 1);
        assert_eq!(second_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn label_collision_supersedes_and_runs_on_clear() {
        let registry = Registry::new();
        let contexts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&contexts);
        let first = registry
            .proxy(
                TaskOptions::new()
                    .callback(|_| ())
                    .label("field")
                    .on_clear(move |ctx| sink.lock().unwrap().push(ctx.clone())),
            )
            .unwrap();
        let second = registry
            .proxy(TaskOptions::new().callback(|_| ()).label("field"))
            .unwrap();

        assert_ne!(first.id(), second.id());
        assert!(!first.call(Payload::Null));
        let contexts = contexts.lock().unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].reason, ClearReason::Superseded);
        assert_eq!(contexts[0].replaced_by, None);
        assert_eq!(contexts[0].label, Some(Key::from("field")));
    }

    #[test]
    fn cancel_is_idempotent() {
        let registry = Registry::new();
        let clears = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&clears);
        let proxy = registry
            .proxy(TaskOptions::new().callback(|_| ()).on_clear(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert_eq!(registry.cancel(TaskKind::Proxy, proxy.id()), 1);
        assert_eq!(registry.cancel(TaskKind::Proxy, proxy.id()), 0);
        assert_eq!(clears.load(Ordering::SeqCst), 1);
        assert!(!proxy.call(Payload::Null));
    }

    #[test]
    fn listener_group_defaults_to_event_name() {
        let registry = Registry::new();
        let bus = Arc::new(EventBus::new());
        let (hits, f) = counter();
        registry.on(bus.clone(), "resize", callback(f)).unwrap();

        assert_eq!(registry.groups(TaskKind::EventListener), vec![Key::from("resize")]);
        bus.emit("resize", Payload::Null);
        bus.emit("resize", Payload::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert_eq!(registry.off("resize"), 1);
        assert_eq!(bus.listener_count("resize"), 0);
        bus.emit("resize", Payload::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn once_listener_detaches_without_native_support() {
        let registry = Registry::new();
        let bus = Arc::new(EventBus::new());
        let (hits, f) = counter();
        registry.once(bus.clone(), "ready", callback(f)).unwrap();

        bus.emit("ready", Payload::Null);
        bus.emit("ready", Payload::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("ready"), 0);
        assert_eq!(registry.len(TaskKind::EventListener), 0);
    }

    #[test]
    fn once_listener_uses_native_once_when_available() {
        let registry = Registry::new();
        let bus = Arc::new(EventBus::with_native_once());
        let (hits, f) = counter();
        registry.once(bus.clone(), "ready", callback(f)).unwrap();

        bus.emit("ready", Payload::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("ready"), 0);
        assert_eq!(registry.len(TaskKind::EventListener), 0);
    }

    #[test]
    fn callback_may_cancel_its_own_group() {
        let registry = Registry::new();
        let bus = Arc::new(EventBus::new());
        let weak = registry.downgrade();
        registry
            .on(
                bus.clone(),
                "end",
                TaskOptions::new().group("gesture").callback(move |_| {
                    if let Some(registry) = weak.upgrade() {
                        registry.cancel(TaskKind::EventListener, Selector::group("gesture"));
                    }
                }),
            )
            .unwrap();
        registry
            .on(bus.clone(), "move", TaskOptions::new().group("gesture").callback(|_| ()))
            .unwrap();

        bus.emit("end", Payload::Null);
        assert_eq!(registry.group_len(TaskKind::EventListener, &Key::from("gesture")), 0);
        assert_eq!(bus.listener_count("end"), 0);
        assert_eq!(bus.listener_count("move"), 0);
    }

    #[test]
    fn suspended_proxy_replays_in_order() {
        let registry = Registry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let proxy = registry
            .proxy(
                TaskOptions::new()
                    .single(false)
                    .group("io")
                    .callback(move |p| sink.lock().unwrap().push(p)),
            )
            .unwrap();

        assert_eq!(registry.suspend(TaskKind::Proxy, Selector::group("io")), 1);
        proxy.call(serde_json::json!(1));
        proxy.call(serde_json::json!(2));
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(registry.unsuspend(TaskKind::Proxy, Selector::group("io")), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![serde_json::json!(1), serde_json::json!(2)]
        );
    }

    #[test]
    fn suspended_one_shot_replays_once() {
        let registry = Registry::new();
        let (hits, f) = counter();
        let proxy = registry.proxy(callback(f)).unwrap();
        registry.suspend(TaskKind::Proxy, proxy.id());
        proxy.call(Payload::Null);
        proxy.call(Payload::Null);
        assert!(registry.contains(TaskKind::Proxy, proxy.id()));

        registry.unsuspend(TaskKind::Proxy, proxy.id());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!registry.contains(TaskKind::Proxy, proxy.id()));
    }

    #[test]
    fn worker_is_terminated_on_cancel() {
        let registry = Registry::new();
        let token = tokio_util::sync::CancellationToken::new();
        let id = registry.worker(token.clone(), TaskOptions::new().group("pool")).unwrap();
        assert_eq!(registry.len(TaskKind::Worker), 1);

        assert_eq!(registry.cancel(TaskKind::Worker, Selector::group("pool")), 1);
        assert!(token.is_cancelled());
        assert!(!registry.contains(TaskKind::Worker, id));
    }

    #[test]
    fn destroy_rejects_new_tasks() {
        let registry = Registry::new();
        registry.proxy(callback(|_| ())).unwrap();
        registry.destroy();
        registry.destroy();
        assert!(registry.is_destroyed());
        assert!(registry.is_empty());
        assert!(matches!(
            registry.proxy(callback(|_| ())),
            Err(RegistryError::Destroyed)
        ));
    }

    #[test]
    fn dropping_registry_detaches_listeners() {
        let bus = Arc::new(EventBus::new());
        {
            let registry = Registry::new();
            registry.on(bus.clone(), "click", callback(|_| ())).unwrap();
            assert_eq!(bus.listener_count("click"), 1);
        }
        assert_eq!(bus.listener_count("click"), 0);
    }

    #[test]
    fn stats_count_kinds_and_groups() {
        let registry = Registry::new();
        let bus = Arc::new(EventBus::new());
        registry.on(bus.clone(), "a", callback(|_| ())).unwrap();
        registry.on(bus.clone(), "b", callback(|_| ())).unwrap();
        registry.proxy(callback(|_| ())).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.groups, 2);
        assert_eq!(stats.per_kind.get(&TaskKind::EventListener), Some(&2));
        assert_eq!(stats.per_kind.get(&TaskKind::Proxy), Some(&1));
        assert!(stats.per_kind.get(&TaskKind::Timeout).is_none());
    }
}
