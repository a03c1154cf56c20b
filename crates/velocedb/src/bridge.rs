use std::sync::{Arc, OnceLock};

use tracing::{debug, trace};
use veloce_engine::WeakEngineHandle;
use veloce_proxy::MutationObserver;
use veloce_types::{HookAction, MutationEvent, MutationHook};

/// Forwards document mutations to the persistence worker.
///
/// The engine handle is attached after the worker has been spawned, since
/// the worker needs the document first. It is weak so that the document,
/// which the worker holds for snapshots, does not keep the worker alive.
pub(crate) struct Bridge {
    engine: OnceLock<WeakEngineHandle>,
    hook: Option<Arc<dyn MutationHook>>,
}

impl Bridge {
    pub(crate) fn new(hook: Option<Arc<dyn MutationHook>>) -> Self {
        Self {
            engine: OnceLock::new(),
            hook,
        }
    }

    pub(crate) fn attach(&self, engine: WeakEngineHandle) {
        if self.engine.set(engine).is_err() {
            debug!("mutation bridge already attached");
        }
    }
}

impl MutationObserver for Bridge {
    fn on_mutation(&self, event: MutationEvent) {
        if let Some(hook) = &self.hook {
            if hook.on_mutation(&event) == HookAction::Suppress {
                trace!(summary = %event.summary(), "mutation suppressed by hook");
                return;
            }
        }
        match self.engine.get() {
            Some(engine) if engine.notify(event) => {}
            _ => debug!("database closed, mutation will not be persisted"),
        }
    }
}
