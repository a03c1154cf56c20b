use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::debug;
use veloce_types::{KeyPath, Method, MutationEvent};

use crate::arena::{Arena, Slot};
use crate::error::{ProxyError, ProxyResult};
use crate::proxy::Proxy;

/// Receives every mutation applied through a document's proxies.
///
/// Called synchronously on the mutating thread after the document lock has
/// been released, so implementations may read the document but must not
/// block for long.
pub trait MutationObserver: Send + Sync {
    fn on_mutation(&self, event: MutationEvent);
}

impl<F> MutationObserver for F
where
    F: Fn(MutationEvent) + Send + Sync,
{
    fn on_mutation(&self, event: MutationEvent) {
        self(event)
    }
}

/// Observer that discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl MutationObserver for NoopObserver {
    fn on_mutation(&self, _event: MutationEvent) {}
}

pub(crate) struct Shared {
    arena: Mutex<Arena>,
    observer: Arc<dyn MutationObserver>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().expect("document lock poisoned")
    }

    pub(crate) fn emit(&self, event: MutationEvent) {
        self.observer.on_mutation(event);
    }
}

/// An observable JSON document.
///
/// Cloning a `Document` yields another handle to the same tree.
#[derive(Clone)]
pub struct Document {
    shared: Arc<Shared>,
}

impl Document {
    /// Create a document holding `value`, reporting mutations to `observer`.
    pub fn new(value: Value, observer: Arc<dyn MutationObserver>) -> Self {
        Self {
            shared: Arc::new(Shared {
                arena: Mutex::new(Arena::new(value)),
                observer,
            }),
        }
    }

    /// Create a document whose mutations are not reported anywhere.
    pub fn unobserved(value: Value) -> Self {
        Self::new(value, Arc::new(NoopObserver))
    }

    /// Proxy for the root container.
    ///
    /// Fails if the root is a scalar.
    pub fn root(&self) -> ProxyResult<Proxy> {
        let mut arena = self.shared.lock();
        let Slot::Node(id) = arena.root else {
            return Err(ProxyError::NotAContainer {
                path: KeyPath::root(),
            });
        };
        let anchor = arena.anchor(id)?;
        Ok(Proxy::new(Arc::clone(&self.shared), anchor))
    }

    /// Deep copy of the whole document, taken atomically.
    pub fn snapshot(&self) -> Value {
        let arena = self.shared.lock();
        arena.materialize(&arena.root)
    }

    /// Swap the whole tree for `value`.
    ///
    /// Proxies obtained before the swap keep working on the old tree, which
    /// is no longer part of the document.
    pub fn replace_root(&self, value: Value) {
        {
            let mut arena = self.shared.lock();
            arena.root = arena.wrap(value.clone(), KeyPath::root());
        }
        self.shared.emit(MutationEvent::new(
            Method::Replace,
            KeyPath::root(),
            vec![value],
            Value::Null,
        ));
    }

    /// Free containers that are unreachable from the root and not held by
    /// any proxy. Returns how many were freed.
    pub fn sweep(&self) -> usize {
        let freed = self.shared.lock().sweep();
        if freed > 0 {
            debug!(freed, "swept detached containers");
        }
        freed
    }

    /// Number of containers currently wrapped.
    pub fn node_count(&self) -> usize {
        self.shared.lock().live_nodes()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("node_count", &self.node_count())
            .finish()
    }
}
