//! Per-kind task cache: a root scope plus one scope per group.
//!
//! Every id lives in exactly one scope of its kind. Empty group scopes are
//! pruned as soon as their last task leaves.

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use tokio::sync::oneshot;

use crate::error::TaskError;
use crate::key::{GroupSelector, Key, Selector};
use crate::kind::TaskKind;
use crate::native::Native;
use crate::registry::Invocation;
use crate::task::{Callback, ClearContext, ClearHook, ClearReason, Payload, TaskId};

/// Sender half of a promise-wrapper waiter.
pub(crate) type Completer = oneshot::Sender<Result<Payload, TaskError>>;

/// Address of a task: `(kind, group)` scope plus id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TaskKey {
    pub kind: TaskKind,
    pub group: Option<Key>,
    pub id: TaskId,
}

/// One live task.
pub(crate) struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub label: Option<Key>,
    pub group: Option<Key>,
    pub recurring: bool,
    /// Taken out while a recurring callback runs.
    pub callback: Option<Callback>,
    pub on_clear: Vec<ClearHook>,
    pub waiters: Vec<Completer>,
    pub native: Option<Native>,
    /// Replace hops the waiters have already travelled.
    pub chain_depth: u32,
    pub suspended: bool,
    pub queued: Vec<Invocation>,
}

impl Task {
    pub fn context(&self, reason: ClearReason, replaced_by: Option<TaskId>) -> ClearContext {
        ClearContext {
            id: self.id,
            kind: self.kind,
            label: self.label.clone(),
            group: self.group.clone(),
            replaced_by,
            reason,
        }
    }
}

#[derive(Default)]
pub(crate) struct Scope {
    labels: HashMap<Key, TaskId>,
    links: BTreeMap<TaskId, Task>,
}

impl Scope {
    pub fn label(&self, label: &Key) -> Option<TaskId> {
        self.labels.get(label).copied()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.links.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    fn insert(&mut self, task: Task) {
        if let Some(label) = &task.label {
            self.labels.insert(label.clone(), task.id);
        }
        self.links.insert(task.id, task);
    }

    fn remove(&mut self, id: TaskId) -> Option<Task> {
        let task = self.links.remove(&id)?;
        if let Some(label) = &task.label {
            if self.labels.get(label) == Some(&id) {
                self.labels.remove(label);
            }
        }
        Some(task)
    }
}

#[derive(Default)]
struct KindCache {
    root: Scope,
    groups: HashMap<Key, Scope>,
}

impl KindCache {
    fn scope(&self, group: Option<&Key>) -> Option<&Scope> {
        match group {
            None => Some(&self.root),
            Some(group) => self.groups.get(group),
        }
    }

    fn scope_mut(&mut self, group: Option<&Key>) -> Option<&mut Scope> {
        match group {
            None => Some(&mut self.root),
            Some(group) => self.groups.get_mut(group),
        }
    }

    fn len(&self) -> usize {
        self.root.len() + self.groups.values().map(Scope::len).sum::<usize>()
    }
}

/// All scopes of all kinds owned by one registry.
#[derive(Default)]
pub(crate) struct Cache {
    kinds: HashMap<TaskKind, KindCache>,
}

impl Cache {
    pub fn scope(&self, kind: TaskKind, group: Option<&Key>) -> Option<&Scope> {
        self.kinds.get(&kind)?.scope(group)
    }

    pub fn label_id(&self, kind: TaskKind, group: Option<&Key>, label: &Key) -> Option<TaskId> {
        self.scope(kind, group)?.label(label)
    }

    pub fn insert(&mut self, task: Task) {
        let cache = self.kinds.entry(task.kind).or_default();
        let scope = match &task.group {
            None => &mut cache.root,
            Some(group) => cache.groups.entry(group.clone()).or_default(),
        };
        scope.insert(task);
    }

    pub fn task_mut(&mut self, key: &TaskKey) -> Option<&mut Task> {
        self.kinds
            .get_mut(&key.kind)?
            .scope_mut(key.group.as_ref())?
            .links
            .get_mut(&key.id)
    }

    pub fn remove(&mut self, key: &TaskKey) -> Option<Task> {
        let cache = self.kinds.get_mut(&key.kind)?;
        let scope = cache.scope_mut(key.group.as_ref())?;
        let task = scope.remove(key.id)?;
        if let Some(group) = &key.group {
            if scope.links.is_empty() {
                cache.groups.remove(group);
            }
        }
        Some(task)
    }

    /// Find the scope holding `id`.
    pub fn locate(&self, kind: TaskKind, id: TaskId) -> Option<TaskKey> {
        let cache = self.kinds.get(&kind)?;
        if cache.root.contains(id) {
            return Some(TaskKey {
                kind,
                group: None,
                id,
            });
        }
        cache
            .groups
            .iter()
            .find(|(_, scope)| scope.contains(id))
            .map(|(group, _)| TaskKey {
                kind,
                group: Some(group.clone()),
                id,
            })
    }

    /// Resolve a selector to the keys of the live tasks it designates.
    pub fn select(&self, kind: TaskKind, selector: &Selector) -> Vec<TaskKey> {
        match &selector.group {
            Some(GroupSelector::Pattern(pattern)) => self
                .groups_matching(kind, pattern)
                .into_iter()
                .flat_map(|group| self.select_in(kind, Some(&group), selector))
                .collect(),
            Some(GroupSelector::Key(group)) => self.select_in(kind, Some(group), selector),
            None => match (selector.id, &selector.label) {
                (None, None) => self.keys_of_kind(kind),
                (Some(id), None) => self.locate(kind, id).into_iter().collect(),
                _ => self.select_in(kind, None, selector),
            },
        }
    }

    fn select_in(&self, kind: TaskKind, group: Option<&Key>, selector: &Selector) -> Vec<TaskKey> {
        let Some(scope) = self.scope(kind, group) else {
            return Vec::new();
        };
        let key = |id| TaskKey {
            kind,
            group: group.cloned(),
            id,
        };

        let id = match (&selector.label, selector.id) {
            (Some(label), explicit) => {
                let Some(found) = scope.label(label) else {
                    return Vec::new();
                };
                if explicit.is_some_and(|id| id != found) {
                    return Vec::new();
                }
                Some(found)
            }
            (None, explicit) => explicit,
        };

        match id {
            Some(id) if scope.contains(id) => vec![key(id)],
            Some(_) => Vec::new(),
            None => scope.links.keys().copied().map(key).collect(),
        }
    }

    fn keys_of_kind(&self, kind: TaskKind) -> Vec<TaskKey> {
        let Some(cache) = self.kinds.get(&kind) else {
            return Vec::new();
        };
        let root = cache.root.links.keys().map(|&id| TaskKey {
            kind,
            group: None,
            id,
        });
        let grouped = cache.groups.iter().flat_map(|(group, scope)| {
            scope.links.keys().map(move |&id| TaskKey {
                kind,
                group: Some(group.clone()),
                id,
            })
        });
        let mut keys: Vec<TaskKey> = root.chain(grouped).collect();
        keys.sort_by_key(|k| k.id);
        keys
    }

    fn groups_matching(&self, kind: TaskKind, pattern: &Regex) -> Vec<Key> {
        self.groups(kind)
            .into_iter()
            .filter(|group| group.name().is_some_and(|name| pattern.is_match(name)))
            .collect()
    }

    /// Names of the non-empty groups of a kind.
    pub fn groups(&self, kind: TaskKind) -> Vec<Key> {
        self.kinds
            .get(&kind)
            .map(|cache| cache.groups.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every task of every kind, oldest first.
    pub fn drain(&mut self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .kinds
            .drain()
            .flat_map(|(_, cache)| {
                let KindCache { root, groups } = cache;
                root.links
                    .into_values()
                    .chain(groups.into_values().flat_map(|scope| scope.links.into_values()))
            })
            .collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub fn len(&self, kind: TaskKind) -> usize {
        self.kinds.get(&kind).map_or(0, KindCache::len)
    }

    pub fn group_len(&self, kind: TaskKind, group: &Key) -> usize {
        self.scope(kind, Some(group)).map_or(0, Scope::len)
    }

    pub fn group_count(&self) -> usize {
        self.kinds.values().map(|cache| cache.groups.len()).sum()
    }
}
