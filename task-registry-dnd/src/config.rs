//! Configuration for drag-and-drop bindings.

use serde::{Deserialize, Serialize};

use crate::error::DndError;

/// Which events start, move and end a gesture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DndConfig {
    /// Events on the target that start a gesture.
    pub start_events: Vec<String>,
    /// Events on the surface reported while dragging.
    pub move_events: Vec<String>,
    /// Events on the surface that end a gesture.
    pub end_events: Vec<String>,
    /// Prefix of every group name created by a binding.
    pub group_prefix: String,
}

impl Default for DndConfig {
    fn default() -> Self {
        Self {
            start_events: vec!["pointerdown".into(), "touchstart".into()],
            move_events: vec!["pointermove".into(), "touchmove".into()],
            end_events: vec!["pointerup".into(), "touchend".into()],
            group_prefix: "dnd".into(),
        }
    }
}

impl DndConfig {
    /// Validate configuration values.
    ///
    /// Checks:
    /// - every event list is non-empty
    /// - `group_prefix` is non-empty
    pub fn validate(&self) -> Result<(), DndError> {
        if self.start_events.is_empty() {
            return Err(DndError::Config("at least one start event is required".into()));
        }
        if self.move_events.is_empty() {
            return Err(DndError::Config("at least one move event is required".into()));
        }
        if self.end_events.is_empty() {
            return Err(DndError::Config("at least one end event is required".into()));
        }
        if self.group_prefix.is_empty() {
            return Err(DndError::Config("group_prefix must not be empty".into()));
        }
        Ok(())
    }
}
