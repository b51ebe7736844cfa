//! Labels, groups and cancellation selectors.

use std::sync::Arc;

use regex::Regex;
use uuid::Uuid;

use crate::task::TaskId;

/// A label or group name.
///
/// `Name` keys compare by string. `Symbol` keys are unique: a symbol only
/// equals its own clones and never matches a group pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Plain string key.
    Name(Arc<str>),
    /// Opaque unique key.
    Symbol(Uuid),
}

impl Key {
    /// Create a fresh symbol distinct from every other key.
    pub fn symbol() -> Self {
        Self::Symbol(Uuid::new_v4())
    }

    /// The string form of a `Name` key.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Symbol(_) => None,
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Name(Arc::from(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Name(Arc::from(name))
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Symbol(n) => write!(f, "symbol#{n}"),
        }
    }
}

/// Group part of a [`Selector`].
#[derive(Debug, Clone)]
pub enum GroupSelector {
    /// Exactly this group.
    Key(Key),
    /// Every named group whose name matches.
    Pattern(Regex),
}

/// Which tasks of a kind an operation applies to.
///
/// - no id, no label, no group: every task of the kind, in every scope;
/// - group only: every task in that group (or in every matching group);
/// - label: the task holding that label in the resolved scope;
/// - id without group: the task with that id, wherever it lives.
///
/// When both id and label are given and the label points elsewhere, nothing
/// is selected.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    /// Explicit task id.
    pub id: Option<TaskId>,
    /// Label within the resolved scope.
    pub label: Option<Key>,
    /// Group or group pattern; `None` is the root scope for label lookups.
    pub group: Option<GroupSelector>,
}

impl Selector {
    /// Select every task of the kind.
    pub fn all() -> Self {
        Self::default()
    }

    /// Select one task by id.
    pub fn id(id: TaskId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Select the task holding `label` in the root scope.
    pub fn label(label: impl Into<Key>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    /// Select every task of one group.
    pub fn group(group: impl Into<Key>) -> Self {
        Self {
            group: Some(GroupSelector::Key(group.into())),
            ..Self::default()
        }
    }

    /// Select every task in groups whose name matches `pattern`.
    pub fn matching(pattern: Regex) -> Self {
        Self {
            group: Some(GroupSelector::Pattern(pattern)),
            ..Self::default()
        }
    }

    /// Narrow the selector to a group.
    pub fn in_group(mut self, group: impl Into<Key>) -> Self {
        self.group = Some(GroupSelector::Key(group.into()));
        self
    }

    /// Narrow the selector to an id.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }
}

impl From<TaskId> for Selector {
    fn from(id: TaskId) -> Self {
        Self::id(id)
    }
}
