//! Debounce and throttle built on labelled timeouts.
//!
//! Both helpers own a private symbol label. [`Debounced`] supersedes the
//! pending timeout on every call; [`Throttled`] joins it, so the first call
//! of a window wins.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::key::{Key, Selector};
use crate::kind::TaskKind;
use crate::registry::Registry;
use crate::task::{callback, Callback, Join, Outcome, Payload, TaskId, TaskOptions};

struct Timed {
    registry: Registry,
    label: Key,
    group: Option<Key>,
    delay: Duration,
    callback: Arc<Mutex<Callback>>,
}

impl Timed {
    fn new(registry: &Registry, callback: Callback, delay: Duration) -> Self {
        Self {
            registry: registry.clone(),
            label: Key::symbol(),
            group: None,
            delay,
            callback: Arc::new(Mutex::new(callback)),
        }
    }

    fn schedule(&self, payload: Payload, join: Join) -> Result<TaskId> {
        let callback = Arc::clone(&self.callback);
        let mut payload = Some(payload);
        let mut options = TaskOptions::new()
            .label(self.label.clone())
            .join(join)
            .delay(self.delay)
            .callback(move |_| -> Outcome {
                let mut guard = callback.lock().unwrap_or_else(|e| e.into_inner());
                let f = &mut *guard;
                f(payload.take().unwrap_or(Payload::Null))
            });
        if let Some(group) = &self.group {
            options = options.group(group.clone());
        }
        self.registry.schedule(TaskKind::Timeout, options)
    }

    fn selector(&self) -> Selector {
        let selector = Selector::label(self.label.clone());
        match &self.group {
            Some(group) => selector.in_group(group.clone()),
            None => selector,
        }
    }

    fn cancel(&self) -> bool {
        self.registry.cancel(TaskKind::Timeout, self.selector()) > 0
    }

    fn is_pending(&self) -> bool {
        self.registry
            .label_id(TaskKind::Timeout, self.group.as_ref(), &self.label)
            .is_some()
    }
}

/// Runs its callback once calls stop arriving for `delay`.
pub struct Debounced(Timed);

impl Debounced {
    /// Place the pending invocation in `group`.
    pub fn in_group(mut self, group: impl Into<Key>) -> Self {
        self.0.group = Some(group.into());
        self
    }

    /// Restart the quiet period; the latest payload is delivered.
    ///
    /// # Errors
    ///
    /// Fails like [`Registry::schedule`].
    pub fn call(&self, payload: Payload) -> Result<TaskId> {
        self.0.schedule(payload, Join::Supersede)
    }

    /// Drop the pending invocation. Returns `false` if none was pending.
    pub fn cancel(&self) -> bool {
        self.0.cancel()
    }

    /// Whether an invocation is waiting for its quiet period.
    pub fn is_pending(&self) -> bool {
        self.0.is_pending()
    }
}

/// Runs its callback at most once per `delay` window.
pub struct Throttled(Timed);

impl Throttled {
    /// Place the pending invocation in `group`.
    pub fn in_group(mut self, group: impl Into<Key>) -> Self {
        self.0.group = Some(group.into());
        self
    }

    /// Open a window if none is open; the first payload of the window is
    /// delivered when it closes.
    ///
    /// # Errors
    ///
    /// Fails like [`Registry::schedule`].
    pub fn call(&self, payload: Payload) -> Result<TaskId> {
        self.0.schedule(payload, Join::Keep)
    }

    /// Drop the pending invocation. Returns `false` if none was pending.
    pub fn cancel(&self) -> bool {
        self.0.cancel()
    }

    /// Whether a window is open.
    pub fn is_pending(&self) -> bool {
        self.0.is_pending()
    }
}

impl Registry {
    /// Debounce `f` by `delay`.
    pub fn debounce<F, R>(&self, f: F, delay: Duration) -> Debounced
    where
        F: FnMut(Payload) -> R + Send + 'static,
        R: Into<Outcome>,
    {
        Debounced(Timed::new(self, callback(f), delay))
    }

    /// Throttle `f` to one invocation per `delay`.
    pub fn throttle<F, R>(&self, f: F, delay: Duration) -> Throttled
    where
        F: FnMut(Payload) -> R + Send + 'static,
        R: Into<Outcome>,
    {
        Throttled(Timed::new(self, callback(f), delay))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;
    use tokio::time::sleep;

    fn recorder() -> (Arc<Mutex<Vec<Payload>>>, impl FnMut(Payload) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |p| sink.lock().unwrap().push(p))
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_delivers_last_call_of_burst() {
        let registry = Registry::new();
        let (seen, f) = recorder();
        let debounced = registry.debounce(f, Duration::from_millis(50));

        for n in 1..=3 {
            debounced.call(json!(n)).unwrap();
            sleep(Duration::from_millis(10)).await;
        }
        assert!(debounced.is_pending());
        assert_eq!(registry.len(TaskKind::Timeout), 1);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(*seen.lock().unwrap(), vec![json!(3)]);
        assert!(!debounced.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_delivers_first_call_per_window() {
        let registry = Registry::new();
        let (seen, f) = recorder();
        let throttled = registry.throttle(f, Duration::from_millis(50));

        let first = throttled.call(json!(1)).unwrap();
        assert_eq!(throttled.call(json!(2)).unwrap(), first);
        sleep(Duration::from_millis(60)).await;
        throttled.call(json!(3)).unwrap();
        sleep(Duration::from_millis(60)).await;

        assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_invocation() {
        let registry = Registry::new();
        let (seen, f) = recorder();
        let debounced = registry
            .debounce(f, Duration::from_millis(20))
            .in_group("form");

        debounced.call(json!("draft")).unwrap();
        assert_eq!(registry.group_len(TaskKind::Timeout, &Key::from("form")), 1);
        assert!(debounced.cancel());
        assert!(!debounced.cancel());

        sleep(Duration::from_millis(50)).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn helpers_do_not_share_labels() {
        let registry = Registry::new();
        let (seen_a, fa) = recorder();
        let (seen_b, fb) = recorder();
        let a = registry.debounce(fa, Duration::from_millis(10));
        let b = registry.debounce(fb, Duration::from_millis(10));

        a.call(json!("a")).unwrap();
        b.call(json!("b")).unwrap();
        assert_eq!(registry.len(TaskKind::Timeout), 2);

        sleep(Duration::from_millis(20)).await;
        assert_eq!(seen_a.lock().unwrap().len(), 1);
        assert_eq!(seen_b.lock().unwrap().len(), 1);
    }
}
