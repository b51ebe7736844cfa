//! task-registry: cancellable timers, listeners, workers and requests.
//!
//! One [`Registry`] tracks every asynchronous resource a component starts so
//! it can be cancelled individually, by label, by group, or all at once.
//!
//! # Model
//!
//! Each [`TaskKind`] has its own cache: a root scope plus one scope per
//! group. Within a scope a label names at most one live task; scheduling a
//! second task under the same label either keeps, supersedes or replaces the
//! first according to its [`Join`] policy.
//!
//! - **Timers** (timeout, interval, immediate, animation frame, idle) run as
//!   tokio tasks racing a cancellation token
//! - **Listeners** attach through the [`EventEmitter`] trait
//! - **Workers** and **requests** wrap a caller-supplied handle or future
//! - **Proxies** wrap a callback behind a callable [`Proxy`] handle
//!
//! Promise wrappers such as [`Registry::sleep`] and [`Registry::wait`] return
//! a [`TaskFuture`] that settles with the task's outcome.

pub mod config;
pub mod debounce;
pub mod emitter;
pub mod error;
pub mod key;
pub mod kind;
pub mod native;
pub mod registry;
pub mod task;
pub mod wrappers;

mod cache;

pub use config::RegistryConfig;
pub use debounce::{Debounced, Throttled};
pub use emitter::{EventBus, EventEmitter, Listener, ListenerId};
pub use error::{AdapterError, RegistryError, Result, TaskError};
pub use key::{GroupSelector, Key, Selector};
pub use kind::TaskKind;
pub use native::{Abort, Worker};
pub use registry::{Proxy, Registry, RegistryStats, WeakRegistry};
pub use task::{
    callback, Callback, ClearContext, ClearReason, Descriptor, Join, Outcome, Payload, Resource,
    TaskId, TaskOptions,
};
pub use wrappers::TaskFuture;
