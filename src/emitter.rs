//! Event emitter abstraction and an in-process implementation.
//!
//! The registry attaches listeners through [`EventEmitter`] and never looks
//! at what the emitter wraps. [`EventBus`] is a plain in-process emitter used
//! by tests, the drag-and-drop client and the demo binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::AdapterError;
use crate::task::Payload;

/// Listener closure stored by an emitter.
pub type Listener = Arc<dyn Fn(&Payload) + Send + Sync + 'static>;

/// Emitter-specific listener handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Anything listeners can be attached to.
///
/// Implementations may deliver to a listener from inside `add_listener`.
/// They should invoke listeners without holding their own locks so that
/// handlers may detach themselves.
pub trait EventEmitter: Send + Sync {
    /// Attach `listener` to `event`. With `once` set (and
    /// [`supports_once`](Self::supports_once) returning `true`) the emitter
    /// detaches the listener itself after the first delivery.
    fn add_listener(&self, event: &str, listener: Listener, once: bool) -> ListenerId;

    /// Detach a listener.
    fn remove_listener(&self, event: &str, listener: ListenerId) -> Result<(), AdapterError>;

    /// Whether `once` listeners are detached natively.
    fn supports_once(&self) -> bool {
        false
    }
}

struct Entry {
    id: ListenerId,
    listener: Listener,
    once: bool,
}

/// In-process event emitter.
pub struct EventBus {
    listeners: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
    native_once: bool,
}

impl EventBus {
    /// Emitter without native once support.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            native_once: false,
        }
    }

    /// Emitter that detaches `once` listeners itself.
    pub fn with_native_once() -> Self {
        Self {
            native_once: true,
            ..Self::new()
        }
    }

    /// Deliver `payload` to every listener of `event`.
    ///
    /// Returns the number of listeners invoked. Listeners run after the bus
    /// lock is released.
    pub fn emit(&self, event: &str, payload: Payload) -> usize {
        let targets: Vec<Listener> = {
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entries) = listeners.get_mut(event) else {
                return 0;
            };
            let targets = entries.iter().map(|e| Arc::clone(&e.listener)).collect();
            entries.retain(|e| !e.once);
            if entries.is_empty() {
                listeners.remove(event);
            }
            targets
        };

        for listener in &targets {
            listener(&payload);
        }
        targets.len()
    }

    /// Number of listeners attached to `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(event)
            .map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter for EventBus {
    fn add_listener(&self, event: &str, listener: Listener, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event.to_owned())
            .or_default()
            .push(Entry {
                id,
                listener,
                once: once && self.native_once,
            });
        id
    }

    fn remove_listener(&self, event: &str, listener: ListenerId) -> Result<(), AdapterError> {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let unknown = || AdapterError::UnknownListener {
            event: event.to_owned(),
            listener: listener.0,
        };
        let entries = listeners.get_mut(event).ok_or_else(unknown)?;
        let before = entries.len();
        entries.retain(|e| e.id != listener);
        if entries.len() == before {
            return Err(unknown());
        }
        if entries.is_empty() {
            listeners.remove(event);
        }
        Ok(())
    }

    fn supports_once(&self) -> bool {
        self.native_once
    }
}
