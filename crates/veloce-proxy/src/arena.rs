use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::trace;
use veloce_types::{Key, KeyPath};

use crate::error::{ProxyError, ProxyResult};

/// Index of a container in a document arena.
///
/// The generation distinguishes a container from whatever later reuses its
/// slot after it has been swept.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}v{})", self.index, self.generation)
    }
}

/// An entry inside a container: either a plain value (scalars, and nested
/// containers nobody has reached yet) or a wrapped container in the arena.
#[derive(Debug)]
pub(crate) enum Slot {
    Raw(Value),
    Node(NodeId),
}

#[derive(Debug)]
pub(crate) enum Container {
    Object(IndexMap<String, Slot>),
    Array(Vec<Slot>),
}

impl Container {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Object(map) => Ok(Self::Object(
                map.into_iter().map(|(k, v)| (k, Slot::Raw(v))).collect(),
            )),
            Value::Array(items) => Ok(Self::Array(items.into_iter().map(Slot::Raw).collect())),
            other => Err(other),
        }
    }

    fn slots(&self) -> Box<dyn Iterator<Item = &Slot> + '_> {
        match self {
            Self::Object(map) => Box::new(map.values()),
            Self::Array(items) => Box::new(items.iter()),
        }
    }
}

/// Resolved position inside a specific container.
#[derive(Debug, Clone)]
pub(crate) enum Target {
    Field(String),
    Index(usize),
}

/// Shared by every proxy for the same node; the arena keeps a weak
/// reference so it can tell whether a node is still held by a caller.
#[derive(Debug)]
pub(crate) struct NodeAnchor {
    pub(crate) id: NodeId,
}

#[derive(Debug)]
struct NodeEntry {
    generation: u32,
    container: Option<Container>,
    path: KeyPath,
    anchor: Weak<NodeAnchor>,
}

/// Arena of containers making up one document.
#[derive(Debug)]
pub(crate) struct Arena {
    entries: Vec<NodeEntry>,
    free: Vec<u32>,
    pub(crate) root: Slot,
}

impl Arena {
    pub(crate) fn new(root: Value) -> Self {
        let mut arena = Self {
            entries: Vec::new(),
            free: Vec::new(),
            root: Slot::Raw(Value::Null),
        };
        arena.root = arena.wrap(root, KeyPath::root());
        arena
    }

    /// Move `value` into the arena if it is a container.
    pub(crate) fn wrap(&mut self, value: Value, path: KeyPath) -> Slot {
        match Container::from_value(value) {
            Ok(container) => Slot::Node(self.alloc(container, path)),
            Err(scalar) => Slot::Raw(scalar),
        }
    }

    fn alloc(&mut self, container: Container, path: KeyPath) -> NodeId {
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.container = Some(container);
            entry.path = path;
            entry.anchor = Weak::new();
            return NodeId {
                index,
                generation: entry.generation,
            };
        }
        let index = self.entries.len() as u32;
        self.entries.push(NodeEntry {
            generation: 0,
            container: Some(container),
            path,
            anchor: Weak::new(),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    fn entry(&self, id: NodeId) -> ProxyResult<&NodeEntry> {
        self.entries
            .get(id.index as usize)
            .filter(|e| e.generation == id.generation && e.container.is_some())
            .ok_or(ProxyError::StaleHandle(id))
    }

    pub(crate) fn container(&self, id: NodeId) -> ProxyResult<&Container> {
        self.entry(id)?
            .container
            .as_ref()
            .ok_or(ProxyError::StaleHandle(id))
    }

    pub(crate) fn container_mut(&mut self, id: NodeId) -> ProxyResult<&mut Container> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.container.as_mut())
            .ok_or(ProxyError::StaleHandle(id))
    }

    pub(crate) fn path(&self, id: NodeId) -> ProxyResult<KeyPath> {
        Ok(self.entry(id)?.path.clone())
    }

    /// Recompute the stored paths of the wrapped containers below `id`
    /// after its entries have moved.
    pub(crate) fn relocate_children(&mut self, id: NodeId) -> ProxyResult<()> {
        let mut stack = vec![id];
        while let Some(parent) = stack.pop() {
            let base = self.path(parent)?;
            let children: Vec<(Key, NodeId)> = match self.container(parent)? {
                Container::Object(map) => map
                    .iter()
                    .filter_map(|(name, slot)| match slot {
                        Slot::Node(child) => Some((Key::Field(name.clone()), *child)),
                        Slot::Raw(_) => None,
                    })
                    .collect(),
                Container::Array(items) => items
                    .iter()
                    .enumerate()
                    .filter_map(|(index, slot)| match slot {
                        Slot::Node(child) => Some((Key::Index(index), *child)),
                        Slot::Raw(_) => None,
                    })
                    .collect(),
            };
            for (key, child) in children {
                let path = base.child(key);
                if let Some(entry) = self.entries.get_mut(child.index as usize) {
                    // Unmoved subtrees already hold the right paths.
                    if entry.path != path {
                        entry.path = path;
                        stack.push(child);
                    }
                }
            }
        }
        Ok(())
    }

    /// The anchor shared by all live proxies of `id`, created on demand.
    pub(crate) fn anchor(&mut self, id: NodeId) -> ProxyResult<Arc<NodeAnchor>> {
        self.entry(id)?;
        let entry = &mut self.entries[id.index as usize];
        if let Some(anchor) = entry.anchor.upgrade() {
            return Ok(anchor);
        }
        let anchor = Arc::new(NodeAnchor { id });
        entry.anchor = Arc::downgrade(&anchor);
        Ok(anchor)
    }

    /// Resolve `key` against the container at `id`.
    ///
    /// Objects accept indices as field names (`obj[0]` is `obj["0"]`).
    /// Arrays accept numeric field names.
    pub(crate) fn target(&self, id: NodeId, key: &Key) -> ProxyResult<Target> {
        match (self.container(id)?, key) {
            (Container::Object(_), Key::Field(name)) => Ok(Target::Field(name.clone())),
            (Container::Object(_), Key::Index(index)) => Ok(Target::Field(index.to_string())),
            (Container::Array(_), Key::Index(index)) => Ok(Target::Index(*index)),
            (Container::Array(_), Key::Field(name)) => {
                name.parse().map(Target::Index).map_err(|_| ProxyError::KeyMismatch {
                    path: self.entry(id).map(|e| e.path.clone()).unwrap_or_default(),
                    key: key.clone(),
                })
            }
        }
    }

    pub(crate) fn slot(&self, id: NodeId, target: &Target) -> ProxyResult<Option<&Slot>> {
        Ok(match (self.container(id)?, target) {
            (Container::Object(map), Target::Field(name)) => map.get(name),
            (Container::Array(items), Target::Index(index)) => items.get(*index),
            _ => None,
        })
    }

    /// Wrap the container stored under `target` on first access and return
    /// its node. Returns `None` if the entry is missing or a scalar.
    pub(crate) fn promote(&mut self, id: NodeId, target: &Target) -> ProxyResult<Option<NodeId>> {
        let raw = match self.slot_mut(id, target)? {
            Some(Slot::Node(child)) => return Ok(Some(*child)),
            Some(Slot::Raw(value)) if value.is_object() || value.is_array() => value.take(),
            _ => return Ok(None),
        };

        let path = self.path(id)?.child(target.key());
        let Slot::Node(child) = self.wrap(raw, path) else {
            unreachable!("containers always wrap to a node");
        };
        if let Some(slot) = self.slot_mut(id, target)? {
            *slot = Slot::Node(child);
        }
        trace!(parent = ?id, ?child, "wrapped nested container");
        Ok(Some(child))
    }

    fn slot_mut(&mut self, id: NodeId, target: &Target) -> ProxyResult<Option<&mut Slot>> {
        Ok(match (self.container_mut(id)?, target) {
            (Container::Object(map), Target::Field(name)) => map.get_mut(name),
            (Container::Array(items), Target::Index(index)) => items.get_mut(*index),
            _ => None,
        })
    }

    /// Deep copy of the value held in `slot`.
    pub(crate) fn materialize(&self, slot: &Slot) -> Value {
        match slot {
            Slot::Raw(value) => value.clone(),
            Slot::Node(id) => self.materialize_node(*id),
        }
    }

    pub(crate) fn materialize_node(&self, id: NodeId) -> Value {
        match self.container(id) {
            Ok(Container::Object(map)) => {
                let mut out = Map::new();
                for (key, slot) in map {
                    out.insert(key.clone(), self.materialize(slot));
                }
                Value::Object(out)
            }
            Ok(Container::Array(items)) => {
                Value::Array(items.iter().map(|slot| self.materialize(slot)).collect())
            }
            Err(_) => Value::Null,
        }
    }

    /// Free every container that is unreachable from the root and from any
    /// live proxy. Returns the number of containers freed.
    pub(crate) fn sweep(&mut self) -> usize {
        let mut marked = vec![false; self.entries.len()];
        let mut stack = Vec::new();

        if let Slot::Node(id) = self.root {
            stack.push(id);
        }
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.container.is_some() && entry.anchor.strong_count() > 0 {
                stack.push(NodeId {
                    index: index as u32,
                    generation: entry.generation,
                });
            }
        }

        while let Some(id) = stack.pop() {
            let index = id.index as usize;
            if marked[index] {
                continue;
            }
            marked[index] = true;
            if let Ok(container) = self.container(id) {
                stack.extend(container.slots().filter_map(|slot| match slot {
                    Slot::Node(child) => Some(*child),
                    Slot::Raw(_) => None,
                }));
            }
        }

        let mut freed = 0;
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.container.is_some() && !marked[index] {
                entry.container = None;
                entry.path = KeyPath::root();
                entry.generation = entry.generation.wrapping_add(1);
                self.free.push(index as u32);
                freed += 1;
            }
        }
        freed
    }

    /// Number of containers currently held in the arena.
    pub(crate) fn live_nodes(&self) -> usize {
        self.entries.iter().filter(|e| e.container.is_some()).count()
    }
}

impl Target {
    pub(crate) fn key(&self) -> Key {
        match self {
            Self::Field(name) => Key::Field(name.clone()),
            Self::Index(index) => Key::Index(*index),
        }
    }
}
