//! Deep Observation
//!
//! Observes every container reachable from a root [`Node`] and reports each
//! change together with the slash-joined path of the container it happened
//! in.
//!
//! # How It Works
//!
//! 1. Every container in the tree gets one change listener and one registry
//!    entry, keyed by the container's identity. The entry records the
//!    container's parent (by identity, not by handle) and its path segment
//!    under that parent.
//!
//! 2. When a listener fires, the tree is patched first: removed values are
//!    unobserved recursively, added values are observed recursively, and after
//!    a splice the segments of shifted array elements are rewritten.
//!
//! 3. The path of the changed container is rebuilt by walking parent links up
//!    to the root, and the caller's listener is invoked.
//!
//! A container may appear in the tree only once. Attaching it at a second
//! position is an error at construction and a panic inside a mutation, since
//! listeners have nowhere to return errors to.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::reactive::{
    Change, Disposer, Identity, ObservableMap, ObservableObject, ObservableVec, VecChange,
};

/// A value in an observable tree.
#[derive(Clone)]
pub enum Node {
    Leaf(Value),
    Object(ObservableObject<Node>),
    Array(ObservableVec<Node>),
    Map(ObservableMap<String, Node>),
}

impl Node {
    /// Build an observable tree from JSON. Objects become
    /// [`ObservableObject`]s and arrays [`ObservableVec`]s.
    pub fn from_json(value: Value) -> Node {
        match value {
            Value::Object(fields) => Node::Object(ObservableObject::from_entries(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Node::from_json(value)))
                    .collect(),
            )),
            Value::Array(items) => Node::Array(ObservableVec::new(
                items.into_iter().map(Node::from_json).collect(),
            )),
            other => Node::Leaf(other),
        }
    }

    /// Snapshot the tree as JSON (tracked). Maps become JSON objects.
    pub fn to_json(&self) -> Value {
        match self {
            Node::Leaf(value) => value.clone(),
            Node::Object(object) => Value::Object(
                object
                    .entries()
                    .into_iter()
                    .map(|(key, node)| (key, node.to_json()))
                    .collect(),
            ),
            Node::Map(map) => Value::Object(
                map.entries()
                    .into_iter()
                    .map(|(key, node)| (key, node.to_json()))
                    .collect(),
            ),
            Node::Array(items) => Value::Array(items.to_vec().iter().map(Node::to_json).collect()),
        }
    }

    /// Identity of the container, or `None` for leaves.
    pub fn container_id(&self) -> Option<usize> {
        match self {
            Node::Leaf(_) => None,
            Node::Object(object) => Some(object.identity()),
            Node::Array(items) => Some(items.identity()),
            Node::Map(map) => Some(map.identity()),
        }
    }

    fn children_untracked(&self) -> Vec<(String, Node)> {
        match self {
            Node::Leaf(_) => Vec::new(),
            Node::Object(object) => object.entries_untracked(),
            Node::Map(map) => map.entries_untracked(),
            Node::Array(items) => items
                .to_vec_untracked()
                .into_iter()
                .enumerate()
                .map(|(index, node)| (index.to_string(), node))
                .collect(),
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Node::Leaf(value)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Leaf(value) => write!(f, "Leaf({value})"),
            Node::Object(object) => f.debug_tuple("Object").field(object).finish(),
            Node::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Node::Map(map) => f.debug_tuple("Map").field(map).finish(),
        }
    }
}

/// A change somewhere in an observed tree.
#[derive(Debug, Clone)]
pub enum DeepChange {
    Object(Change<String, Node>),
    Map(Change<String, Node>),
    Array(VecChange<Node>),
}

impl DeepChange {
    pub fn kind(&self) -> crate::reactive::ChangeKind {
        match self {
            DeepChange::Object(change) | DeepChange::Map(change) => change.kind(),
            DeepChange::Array(change) => change.kind(),
        }
    }
}

type DeepListener = Box<dyn Fn(&DeepChange, &str, &Node) + Send + Sync>;

struct TreeEntry {
    parent: Option<usize>,
    segment: String,
    node: Node,
    disposer: Disposer,
}

fn join_path(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}/{segment}")
    }
}

fn build_path(entries: &HashMap<usize, TreeEntry>, mut id: Option<usize>) -> String {
    let mut segments = Vec::new();
    while let Some(entry) = id.and_then(|id| entries.get(&id)) {
        if entry.parent.is_none() {
            break;
        }
        segments.push(entry.segment.as_str());
        id = entry.parent;
    }
    segments.reverse();
    segments.join("/")
}

struct DeepState {
    root: Node,
    entries: Mutex<HashMap<usize, TreeEntry>>,
    listener: DeepListener,
    weak_self: Weak<DeepState>,
}

impl DeepState {
    fn observe(&self, thing: &Node, parent: Option<usize>, segment: String) -> Result<()> {
        let Some(id) = thing.container_id() else {
            return Ok(());
        };
        {
            let entries = self.entries.lock();
            if let Some(entry) = entries.get(&id) {
                if entry.parent != parent || entry.segment != segment {
                    return Err(Error::TreeAliasing {
                        attempted: join_path(&build_path(&entries, parent), &segment),
                        existing: join_path(&build_path(&entries, entry.parent), &entry.segment),
                    });
                }
                return Ok(());
            }
        }

        let disposer = self.attach(thing, id);
        self.entries.lock().insert(
            id,
            TreeEntry {
                parent,
                segment,
                node: thing.clone(),
                disposer,
            },
        );
        for (key, child) in thing.children_untracked() {
            self.observe(&child, Some(id), key)?;
        }
        Ok(())
    }

    fn unobserve(&self, thing: &Node) {
        let Some(id) = thing.container_id() else {
            return;
        };
        let Some(entry) = self.entries.lock().remove(&id) else {
            return;
        };
        entry.disposer.dispose();
        for (_, child) in thing.children_untracked() {
            self.unobserve(&child);
        }
    }

    fn attach(&self, thing: &Node, id: usize) -> Disposer {
        let weak = self.weak_self.clone();
        let deliver = move |change: DeepChange| {
            if let Some(state) = weak.upgrade() {
                state.handle(id, change);
            }
        };
        match thing {
            Node::Leaf(_) => Disposer::noop(),
            Node::Object(object) => {
                object.observe(move |change| deliver(DeepChange::Object(change.clone())))
            }
            Node::Map(map) => map.observe(move |change| deliver(DeepChange::Map(change.clone()))),
            Node::Array(items) => {
                items.observe(move |change| deliver(DeepChange::Array(change.clone())))
            }
        }
    }

    fn handle(&self, id: usize, change: DeepChange) {
        if !self.entries.lock().contains_key(&id) {
            return;
        }
        if let Err(err) = self.process(id, &change) {
            panic!("{err}");
        }
        let path = build_path(&self.entries.lock(), Some(id));
        (self.listener)(&change, &path, &self.root);
    }

    fn process(&self, id: usize, change: &DeepChange) -> Result<()> {
        match change {
            DeepChange::Object(change) | DeepChange::Map(change) => match change {
                Change::Add { key, new_value } => self.observe(new_value, Some(id), key.clone()),
                Change::Update {
                    key,
                    old_value,
                    new_value,
                } => {
                    self.unobserve(old_value);
                    self.observe(new_value, Some(id), key.clone())
                }
                Change::Remove { old_value, .. } | Change::Delete { old_value, .. } => {
                    self.unobserve(old_value);
                    Ok(())
                }
                Change::Splice { .. } => Ok(()),
            },
            DeepChange::Array(change) => match change {
                Change::Update {
                    key,
                    old_value,
                    new_value,
                } => {
                    self.unobserve(old_value);
                    self.observe(new_value, Some(id), key.to_string())
                }
                Change::Splice {
                    index,
                    removed,
                    added,
                    added_count,
                    ..
                } => {
                    for node in removed {
                        self.unobserve(node);
                    }
                    for (offset, node) in added.iter().enumerate() {
                        self.observe(node, Some(id), (index + offset).to_string())?;
                    }
                    self.reindex(id, index + added_count);
                    Ok(())
                }
                Change::Add { .. } | Change::Remove { .. } | Change::Delete { .. } => Ok(()),
            },
        }
    }

    /// Rewrite the segments of array elements from `start` on.
    fn reindex(&self, array_id: usize, start: usize) {
        let mut entries = self.entries.lock();
        let Some(Node::Array(items)) = entries.get(&array_id).map(|entry| entry.node.clone()) else {
            return;
        };
        for (index, node) in items.to_vec_untracked().iter().enumerate().skip(start) {
            if let Some(entry) = node.container_id().and_then(|id| entries.get_mut(&id)) {
                entry.segment = index.to_string();
            }
        }
    }

    fn dispose_all(&self) {
        let entries: Vec<TreeEntry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.disposer.dispose();
        }
    }
}

impl Drop for DeepState {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

/// Handle to a deep observation started by [`deep_observe`].
///
/// Observation stops on [`dispose`](DeepObserver::dispose) or when the last
/// handle is dropped.
#[derive(Clone)]
pub struct DeepObserver {
    state: Arc<DeepState>,
}

impl DeepObserver {
    /// Stop observing the whole tree. Disposing twice is a no-op.
    pub fn dispose(&self) {
        self.state.unobserve(&self.state.root);
        self.state.dispose_all();
    }

    /// Number of containers currently observed.
    pub fn tracked_count(&self) -> usize {
        self.state.entries.lock().len()
    }

    /// Path of `node` in the tree, if it is an observed container.
    pub fn path_of(&self, node: &Node) -> Option<String> {
        let id = node.container_id()?;
        let entries = self.state.entries.lock();
        entries.contains_key(&id).then(|| build_path(&entries, Some(id)))
    }
}

impl std::fmt::Debug for DeepObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepObserver")
            .field("tracked", &self.tracked_count())
            .finish()
    }
}

/// Observe `root` and everything below it.
///
/// `listener` receives each change, the path of the container it happened in
/// (`""` for the root), and the root.
///
/// Fails with [`Error::TreeAliasing`] if a container is reachable at two
/// positions.
pub fn deep_observe<F>(root: &Node, listener: F) -> Result<DeepObserver>
where
    F: Fn(&DeepChange, &str, &Node) + Send + Sync + 'static,
{
    let state = Arc::new_cyclic(|weak_self| DeepState {
        root: root.clone(),
        entries: Mutex::new(HashMap::new()),
        listener: Box::new(listener),
        weak_self: weak_self.clone(),
    });
    if let Err(err) = state.observe(root, None, String::new()) {
        state.dispose_all();
        return Err(err);
    }
    tracing::debug!(containers = state.entries.lock().len(), "deep observation started");
    Ok(DeepObserver { state })
}
