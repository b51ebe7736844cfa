//! Pointer payloads and gesture hooks.

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use task_registry::Payload;

/// Stage of a gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DragPhase {
    /// Pointer went down on the target.
    Start,
    /// Pointer moved over the surface.
    Move,
    /// Pointer was released.
    End,
}

#[derive(Deserialize)]
struct Pointer {
    #[serde(alias = "clientX")]
    x: f64,
    #[serde(alias = "clientY")]
    y: f64,
    #[serde(default, alias = "pointerId")]
    pointer_id: Option<i64>,
}

/// One pointer event of a gesture, positioned relative to where it began.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DragEvent {
    /// Gesture stage.
    pub phase: DragPhase,
    /// Absolute x position.
    pub x: f64,
    /// Absolute y position.
    pub y: f64,
    /// Horizontal offset from the start position.
    pub dx: f64,
    /// Vertical offset from the start position.
    pub dy: f64,
    /// Pointer id, when the emitter reports one.
    pub pointer_id: Option<i64>,
}

impl DragEvent {
    /// Parse an event payload.
    ///
    /// Accepts `x`/`y` or `clientX`/`clientY` coordinates. `origin` is the
    /// start position; `None` makes this event its own origin.
    pub fn from_payload(
        payload: &Payload,
        phase: DragPhase,
        origin: Option<(f64, f64)>,
    ) -> Result<Self, serde_json::Error> {
        let pointer = Pointer::deserialize(payload)?;
        let (ox, oy) = origin.unwrap_or((pointer.x, pointer.y));
        Ok(Self {
            phase,
            x: pointer.x,
            y: pointer.y,
            dx: pointer.x - ox,
            dy: pointer.y - oy,
            pointer_id: pointer.pointer_id,
        })
    }
}

/// Gesture hook; `Break` ends the gesture without running later hooks.
pub type Hook = Box<dyn FnMut(&DragEvent) -> ControlFlow<()> + Send + 'static>;

/// Caller hooks run over a gesture.
#[derive(Default)]
pub struct DragHooks {
    pub(crate) on_drag_start: Option<Hook>,
    pub(crate) on_drag: Option<Hook>,
    pub(crate) on_drag_end: Option<Hook>,
}

impl DragHooks {
    /// No hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run when a gesture starts. `Break` cancels the gesture before any
    /// move or end listener is attached.
    pub fn on_drag_start<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&DragEvent) -> ControlFlow<()> + Send + 'static,
    {
        self.on_drag_start = Some(Box::new(hook));
        self
    }

    /// Run on every move.
    pub fn on_drag<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&DragEvent) -> ControlFlow<()> + Send + 'static,
    {
        self.on_drag = Some(Box::new(hook));
        self
    }

    /// Run when the pointer is released.
    pub fn on_drag_end<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&DragEvent) -> ControlFlow<()> + Send + 'static,
    {
        self.on_drag_end = Some(Box::new(hook));
        self
    }

    pub(crate) fn run(&mut self, event: &DragEvent) -> ControlFlow<()> {
        let hook = match event.phase {
            DragPhase::Start => self.on_drag_start.as_mut(),
            DragPhase::Move => self.on_drag.as_mut(),
            DragPhase::End => self.on_drag_end.as_mut(),
        };
        match hook {
            Some(hook) => hook(event),
            None => ControlFlow::Continue(()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_and_client_coordinates() {
        let plain = DragEvent::from_payload(&json!({"x": 4.0, "y": 2.0}), DragPhase::Start, None)
            .unwrap();
        assert_eq!((plain.dx, plain.dy), (0.0, 0.0));

        let client = DragEvent::from_payload(
            &json!({"clientX": 10, "clientY": 7, "pointerId": 3}),
            DragPhase::Move,
            Some((4.0, 2.0)),
        )
        .unwrap();
        assert_eq!((client.dx, client.dy), (6.0, 5.0));
        assert_eq!(client.pointer_id, Some(3));
    }

    #[test]
    fn payload_without_coordinates_is_rejected() {
        assert!(DragEvent::from_payload(&json!({"button": 0}), DragPhase::Start, None).is_err());
        assert!(DragEvent::from_payload(&Payload::Null, DragPhase::End, None).is_err());
    }

    #[test]
    fn run_dispatches_by_phase() {
        let mut hooks = DragHooks::new().on_drag(|_| ControlFlow::Break(()));
        let event = DragEvent::from_payload(&json!({"x": 0, "y": 0}), DragPhase::Move, None)
            .unwrap();
        assert_eq!(hooks.run(&event), ControlFlow::Break(()));

        let end = DragEvent {
            phase: DragPhase::End,
            ..event
        };
        assert_eq!(hooks.run(&end), ControlFlow::Continue(()));
    }
}
