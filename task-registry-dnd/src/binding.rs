//! Listener wiring for drag-and-drop bindings.
//!
//! A binding owns one group holding its start listeners on the target. Each
//! gesture gets its own child group on the surface holding the move and end
//! listeners, and the whole child group is cancelled when the gesture ends.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};

use regex::Regex;
use task_registry::{
    EventEmitter, Payload, Registry, Selector, TaskKind, TaskOptions, WeakRegistry,
};
use tracing::debug;
use uuid::Uuid;

use crate::config::DndConfig;
use crate::error::Result;
use crate::gesture::{DragEvent, DragHooks, DragPhase};

struct Binding {
    registry: WeakRegistry,
    surface: Arc<dyn EventEmitter>,
    hooks: Mutex<DragHooks>,
    group: String,
    move_events: Vec<String>,
    end_events: Vec<String>,
}

struct Gesture {
    group: String,
    origin: (f64, f64),
    pointer: Option<i64>,
    done: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Binding {
    fn start(self: &Arc<Self>, payload: &Payload) {
        let event = match DragEvent::from_payload(payload, DragPhase::Start, None) {
            Ok(event) => event,
            Err(e) => {
                debug!(binding = %self.group, "ignoring start event: {e}");
                return;
            }
        };
        if lock(&self.hooks).run(&event).is_break() {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        let gesture = Arc::new(Mutex::new(Gesture {
            group: format!("{}.{}", self.group, Uuid::new_v4()),
            origin: (event.x, event.y),
            pointer: event.pointer_id,
            done: false,
        }));
        let group = lock(&gesture).group.clone();

        let phases = self
            .move_events
            .iter()
            .map(|e| (e, DragPhase::Move))
            .chain(self.end_events.iter().map(|e| (e, DragPhase::End)));
        for (event_name, phase) in phases {
            let binding = Arc::clone(self);
            let gesture = Arc::clone(&gesture);
            let options = TaskOptions::new()
                .group(group.as_str())
                .callback(move |payload: Payload| binding.track(&gesture, phase, &payload));
            if let Err(e) = registry.on(Arc::clone(&self.surface), event_name, options) {
                debug!(gesture = %group, "gesture listener not attached: {e}");
                registry.cancel(TaskKind::EventListener, Selector::group(group.as_str()));
                return;
            }
        }
        debug!(gesture = %group, "gesture started");
    }

    fn track(&self, gesture: &Mutex<Gesture>, phase: DragPhase, payload: &Payload) {
        let (origin, pointer) = {
            let gesture = lock(gesture);
            if gesture.done {
                return;
            }
            (gesture.origin, gesture.pointer)
        };
        let event = match DragEvent::from_payload(payload, phase, Some(origin)) {
            Ok(event) => event,
            Err(e) => {
                debug!(binding = %self.group, "ignoring {phase:?} event: {e}");
                return;
            }
        };
        if pointer.is_some() && event.pointer_id.is_some() && pointer != event.pointer_id {
            return;
        }

        let flow = lock(&self.hooks).run(&event);
        if phase == DragPhase::End || flow == ControlFlow::Break(()) {
            self.finish(gesture);
        }
    }

    fn finish(&self, gesture: &Mutex<Gesture>) {
        let group = {
            let mut gesture = lock(gesture);
            gesture.done = true;
            gesture.group.clone()
        };
        if let Some(registry) = self.registry.upgrade() {
            let cancelled =
                registry.cancel(TaskKind::EventListener, Selector::group(group.as_str()));
            debug!(gesture = %group, listeners = cancelled, "gesture finished");
        }
    }
}

/// Drag-and-drop tracking attached to one target.
pub struct DragAndDrop {
    registry: Registry,
    group: String,
}

impl DragAndDrop {
    /// Start listening for gestures on `target`; moves and releases are
    /// tracked on `surface`.
    ///
    /// # Errors
    ///
    /// Returns [`DndError::Config`](crate::DndError::Config) for an invalid
    /// configuration and [`DndError::Registry`](crate::DndError::Registry)
    /// if a start listener cannot be registered.
    pub fn attach(
        registry: &Registry,
        target: Arc<dyn EventEmitter>,
        surface: Arc<dyn EventEmitter>,
        hooks: DragHooks,
        config: DndConfig,
    ) -> Result<Self> {
        config.validate()?;
        let group = format!("{}.{}", config.group_prefix, Uuid::new_v4());
        let binding = Arc::new(Binding {
            registry: registry.downgrade(),
            surface,
            hooks: Mutex::new(hooks),
            group: group.clone(),
            move_events: config.move_events,
            end_events: config.end_events,
        });

        for event in &config.start_events {
            let binding = Arc::clone(&binding);
            let options = TaskOptions::new()
                .group(group.as_str())
                .callback(move |payload: Payload| binding.start(&payload));
            if let Err(e) = registry.on(Arc::clone(&target), event, options) {
                registry.cancel(TaskKind::EventListener, Selector::group(group.as_str()));
                return Err(e.into());
            }
        }

        debug!(binding = %group, "drag-and-drop attached");
        Ok(Self {
            registry: registry.clone(),
            group,
        })
    }

    /// Group holding the start listeners; gesture groups are named
    /// `<group>.<uuid>`.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Number of gestures in progress.
    pub fn active_gestures(&self) -> usize {
        let prefix = format!("{}.", self.group);
        self.registry
            .groups(TaskKind::EventListener)
            .iter()
            .filter(|g| g.name().is_some_and(|name| name.starts_with(&prefix)))
            .count()
    }

    /// Remove every listener of this binding, including gestures in progress.
    ///
    /// Returns the number of listeners removed.
    pub fn detach(&self) -> usize {
        let pattern = format!(r"^{}(\.|$)", regex::escape(&self.group));
        match Regex::new(&pattern) {
            Ok(pattern) => self
                .registry
                .cancel(TaskKind::EventListener, Selector::matching(pattern)),
            Err(e) => {
                debug!(binding = %self.group, "invalid detach pattern: {e}");
                0
            }
        }
    }
}

impl std::fmt::Debug for DragAndDrop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DragAndDrop")
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}
