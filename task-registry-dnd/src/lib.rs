//! # task-registry-dnd
//!
//! Drag-and-drop gesture tracking built only from task-registry listeners.
//!
//! ## Design
//!
//! - Start listeners live in one group per binding (`dnd.<uuid>`)
//! - Each gesture gets a throwaway child group holding its move and end
//!   listeners on the surface, cancelled wholesale when the gesture ends
//! - Concurrent gestures on one surface are told apart by pointer id
//! - Any hook returning `ControlFlow::Break(())` ends its gesture early

pub mod binding;
pub mod config;
pub mod error;
pub mod gesture;

pub use binding::DragAndDrop;
pub use config::DndConfig;
pub use error::{DndError, Result};
pub use gesture::{DragEvent, DragHooks, DragPhase, Hook};
