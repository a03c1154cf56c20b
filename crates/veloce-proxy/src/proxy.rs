use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use veloce_types::{Key, KeyPath, Method, MutationEvent};

use crate::arena::{Arena, Container, NodeAnchor, NodeId, Slot, Target};
use crate::document::Shared;
use crate::error::{ProxyError, ProxyResult};

/// Handle to one object or array inside a [`Document`](crate::Document).
///
/// Reads behave like reads on the plain JSON value. Every mutating call is
/// reported to the document's observer once it has been applied, including
/// writes that store a value equal to the current one. The event `result`
/// is the call's own return value (previous value, removed value, or new
/// length), or `null` where there is none.
///
/// Two proxies compare equal when they refer to the same container.
#[derive(Clone)]
pub struct Proxy {
    shared: Arc<Shared>,
    anchor: Arc<NodeAnchor>,
}

impl Proxy {
    pub(crate) fn new(shared: Arc<Shared>, anchor: Arc<NodeAnchor>) -> Self {
        Self { shared, anchor }
    }

    pub fn id(&self) -> NodeId {
        self.anchor.id
    }

    /// Current location in the document. A detached container keeps the
    /// location it had when it was removed.
    pub fn path(&self) -> KeyPath {
        self.shared.lock().path(self.id()).unwrap_or_default()
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self.shared.lock().container(self.id()),
            Ok(Container::Array(_))
        )
    }

    pub fn is_object(&self) -> bool {
        matches!(
            self.shared.lock().container(self.id()),
            Ok(Container::Object(_))
        )
    }

    /// Number of fields or elements.
    pub fn len(&self) -> usize {
        match self.shared.lock().container(self.id()) {
            Ok(Container::Object(map)) => map.len(),
            Ok(Container::Array(items)) => items.len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field names in order, or every index for an array.
    pub fn keys(&self) -> Vec<Key> {
        match self.shared.lock().container(self.id()) {
            Ok(Container::Object(map)) => map.keys().cloned().map(Key::Field).collect(),
            Ok(Container::Array(items)) => (0..items.len()).map(Key::Index).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn contains_key(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        let arena = self.shared.lock();
        arena
            .target(self.id(), &key)
            .and_then(|target| arena.slot(self.id(), &target))
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Deep copy of the entry under `key`.
    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        let arena = self.shared.lock();
        let target = arena.target(self.id(), &key).ok()?;
        let slot = arena.slot(self.id(), &target).ok()??;
        Some(arena.materialize(slot))
    }

    /// Proxy for the object or array under `key`.
    ///
    /// Returns `None` if the entry is missing or a scalar. Repeated calls
    /// return proxies for the same container.
    pub fn child(&self, key: impl Into<Key>) -> Option<Proxy> {
        let key = key.into();
        let mut arena = self.shared.lock();
        let target = arena.target(self.id(), &key).ok()?;
        let child = arena.promote(self.id(), &target).ok()??;
        let anchor = arena.anchor(child).ok()?;
        Some(Proxy::new(Arc::clone(&self.shared), anchor))
    }

    /// Deep copy of this container.
    pub fn value(&self) -> Value {
        self.shared.lock().materialize_node(self.id())
    }

    /// Store `value` under `key`, returning the previous entry.
    ///
    /// On an array, setting index `len` appends. Indices past `len` are
    /// rejected with [`ProxyError::IndexOutOfBounds`].
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> ProxyResult<Option<Value>> {
        let key = key.into();
        let value = value.into();
        let id = self.id();

        let (previous, path) = {
            let mut arena = self.shared.lock();
            let target = arena.target(id, &key)?;
            let path = arena.path(id)?;
            if let (Container::Array(items), Target::Index(index)) = (arena.container(id)?, &target) {
                if *index > items.len() {
                    return Err(ProxyError::IndexOutOfBounds {
                        path,
                        index: *index,
                        len: items.len(),
                    });
                }
            }
            let slot = arena.wrap(value.clone(), path.child(target.key()));
            let previous = match (arena.container_mut(id)?, target) {
                (Container::Object(map), Target::Field(name)) => map.insert(name, slot),
                (Container::Array(items), Target::Index(index)) => {
                    if index < items.len() {
                        Some(std::mem::replace(&mut items[index], slot))
                    } else {
                        items.push(slot);
                        None
                    }
                }
                _ => return Err(ProxyError::StaleHandle(id)),
            };
            (previous.map(|slot| arena.materialize(&slot)), path)
        };

        self.emit(
            Method::Set,
            path,
            vec![key.to_value(), value],
            previous.clone().unwrap_or(Value::Null),
        );
        Ok(previous)
    }

    /// Remove the entry under `key`, returning it.
    ///
    /// On an array, later elements shift down by one. Removing a missing
    /// entry is still reported as a mutation.
    pub fn remove(&self, key: impl Into<Key>) -> ProxyResult<Option<Value>> {
        let key = key.into();
        let id = self.id();

        let (removed, path) = {
            let mut arena = self.shared.lock();
            let target = arena.target(id, &key)?;
            let path = arena.path(id)?;
            let removed = match (arena.container_mut(id)?, target) {
                (Container::Object(map), Target::Field(name)) => map.shift_remove(&name),
                (Container::Array(items), Target::Index(index)) if index < items.len() => {
                    Some(items.remove(index))
                }
                _ => None,
            };
            arena.relocate_children(id)?;
            (removed.map(|slot| arena.materialize(&slot)), path)
        };

        self.emit(
            Method::DeleteProperty,
            path,
            vec![key.to_value()],
            removed.clone().unwrap_or(Value::Null),
        );
        Ok(removed)
    }

    /// Append to an array, returning the new length.
    pub fn push(&self, value: impl Into<Value>) -> ProxyResult<usize> {
        let value = value.into();
        let id = self.id();

        let (len, path) = {
            let mut arena = self.shared.lock();
            let (path, len) = require_array(&arena, id, Method::Push)?;
            let slot = arena.wrap(value.clone(), path.child(Key::Index(len)));
            let items = array_mut(&mut arena, id)?;
            items.push(slot);
            (items.len(), path)
        };

        self.emit(Method::Push, path, vec![value], Value::from(len));
        Ok(len)
    }

    /// Remove and return the last element of an array.
    pub fn pop(&self) -> ProxyResult<Option<Value>> {
        let id = self.id();

        let (popped, path) = {
            let mut arena = self.shared.lock();
            let (path, _) = require_array(&arena, id, Method::Pop)?;
            let slot = array_mut(&mut arena, id)?.pop();
            (slot.map(|slot| arena.materialize(&slot)), path)
        };

        self.emit(
            Method::Pop,
            path,
            Vec::new(),
            popped.clone().unwrap_or(Value::Null),
        );
        Ok(popped)
    }

    /// Remove and return the first element of an array.
    pub fn shift(&self) -> ProxyResult<Option<Value>> {
        let id = self.id();

        let (shifted, path) = {
            let mut arena = self.shared.lock();
            let (path, len) = require_array(&arena, id, Method::Shift)?;
            let items = array_mut(&mut arena, id)?;
            let slot = (len > 0).then(|| items.remove(0));
            arena.relocate_children(id)?;
            (slot.map(|slot| arena.materialize(&slot)), path)
        };

        self.emit(
            Method::Shift,
            path,
            Vec::new(),
            shifted.clone().unwrap_or(Value::Null),
        );
        Ok(shifted)
    }

    /// Prepend to an array, returning the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> ProxyResult<usize> {
        let value = value.into();
        let id = self.id();

        let (len, path) = {
            let mut arena = self.shared.lock();
            let (path, _) = require_array(&arena, id, Method::Unshift)?;
            let slot = arena.wrap(value.clone(), path.child(Key::Index(0)));
            let items = array_mut(&mut arena, id)?;
            items.insert(0, slot);
            let len = items.len();
            arena.relocate_children(id)?;
            (len, path)
        };

        self.emit(Method::Unshift, path, vec![value], Value::from(len));
        Ok(len)
    }

    /// Insert into an array at `index`, shifting later elements up.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> ProxyResult<()> {
        let len = self.len();
        if index > len && self.is_array() {
            return Err(ProxyError::IndexOutOfBounds {
                path: self.path(),
                index,
                len,
            });
        }
        self.splice(index, 0, vec![value.into()]).map(|_| ())
    }

    /// Remove `delete_count` elements starting at `start` and insert `items`
    /// in their place. Out-of-range arguments are clamped the way
    /// `Array.prototype.splice` clamps them. Returns the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> ProxyResult<Vec<Value>> {
        let id = self.id();

        let (removed, path) = {
            let mut arena = self.shared.lock();
            let (path, len) = require_array(&arena, id, Method::Splice)?;
            let start = start.min(len);
            let end = start + delete_count.min(len - start);
            let slots: Vec<Slot> = items
                .iter()
                .enumerate()
                .map(|(offset, item)| arena.wrap(item.clone(), path.child(Key::Index(start + offset))))
                .collect();
            let removed: Vec<Slot> = array_mut(&mut arena, id)?
                .splice(start..end, slots)
                .collect();
            arena.relocate_children(id)?;
            let removed: Vec<Value> = removed.iter().map(|slot| arena.materialize(slot)).collect();
            (removed, path)
        };

        let mut args = vec![Value::from(start), Value::from(delete_count)];
        args.extend(items);
        self.emit(Method::Splice, path, args, Value::Array(removed.clone()));
        Ok(removed)
    }

    /// Remove every field or element.
    pub fn clear(&self) -> ProxyResult<()> {
        let id = self.id();

        let path = {
            let mut arena = self.shared.lock();
            let path = arena.path(id)?;
            match arena.container_mut(id)? {
                Container::Object(map) => map.clear(),
                Container::Array(items) => items.clear(),
            }
            path
        };

        self.emit(Method::Clear, path, Vec::new(), Value::Null);
        Ok(())
    }

    fn emit(&self, method: Method, path: KeyPath, args: Vec<Value>, result: Value) {
        self.shared
            .emit(MutationEvent::new(method, path, args, result));
    }
}

fn require_array(arena: &Arena, id: NodeId, method: Method) -> ProxyResult<(KeyPath, usize)> {
    let path = arena.path(id)?;
    match arena.container(id)? {
        Container::Array(items) => Ok((path, items.len())),
        Container::Object(_) => Err(ProxyError::NotAnArray { path, method }),
    }
}

fn array_mut(arena: &mut Arena, id: NodeId) -> ProxyResult<&mut Vec<Slot>> {
    match arena.container_mut(id)? {
        Container::Array(items) => Ok(items),
        Container::Object(_) => Err(ProxyError::StaleHandle(id)),
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared) && self.anchor.id == other.anchor.id
    }
}

impl Eq for Proxy {}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("id", &self.id())
            .field("path", &self.path().to_string())
            .finish()
    }
}
