//! Registry of change sinks, keyed by the context they listen to.

use super::mode::ObservationMode;
use crate::context::ManagedObject;
use crate::queue::ExecutionQueue;
use crate::types::ContextId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Raw "objects changed in this context" event.
#[derive(Clone, Debug)]
pub struct ContextChanges {
    /// Context the changes happened in.
    pub context: ContextId,
    pub inserted: Vec<ManagedObject>,
    pub updated: Vec<ManagedObject>,
    pub deleted: Vec<ManagedObject>,
}

impl ContextChanges {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Receives raw change events. Called on the emitting context's queue.
pub type ChangeSink = Arc<dyn Fn(&ContextChanges) + Send + Sync>;

/// Unique identifier for a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

/// Which contexts a registration listens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationSource {
    AnyContext,
    Context(ContextId),
}

impl NotificationSource {
    fn matches(&self, context: ContextId) -> bool {
        match self {
            NotificationSource::AnyContext => true,
            NotificationSource::Context(id) => *id == context,
        }
    }
}

struct Registration {
    source: NotificationSource,
    sink: ChangeSink,
}

/// Dispatches context change events to registered sinks.
pub struct ChangeHub {
    /// Active registrations by ID.
    registrations: RwLock<HashMap<RegistrationId, Registration>>,
    /// Counter for generating registration IDs.
    next_id: AtomicU64,
    /// Fallback delivery queue for observers created off any queue.
    main_queue: ExecutionQueue,
}

impl ChangeHub {
    pub fn new(main_queue: ExecutionQueue) -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            main_queue,
        }
    }

    pub fn main_queue(&self) -> &ExecutionQueue {
        &self.main_queue
    }

    /// The queue the caller runs on, or the main queue.
    pub fn default_delivery_queue(&self) -> ExecutionQueue {
        ExecutionQueue::current().unwrap_or_else(|| self.main_queue.clone())
    }

    /// Register a sink for one source.
    pub fn register(&self, source: NotificationSource, sink: ChangeSink) -> RegistrationId {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.registrations
            .write()
            .insert(id, Registration { source, sink });
        id
    }

    pub fn unregister(&self, id: RegistrationId) {
        self.registrations.write().remove(&id);
    }

    /// Number of live registrations.
    pub fn registration_count(&self) -> usize {
        self.registrations.read().len()
    }

    /// Deliver an event to every sink listening to its context, in
    /// registration order of arrival. Sinks run after the registry lock is
    /// released, so they may register or unregister.
    pub fn broadcast(&self, changes: &ContextChanges) {
        let sinks: Vec<ChangeSink> = {
            let registrations = self.registrations.read();
            let mut matching: Vec<(&RegistrationId, &Registration)> = registrations
                .iter()
                .filter(|(_, registration)| registration.source.matches(changes.context))
                .collect();
            matching.sort_by_key(|(id, _)| id.0);
            matching
                .into_iter()
                .map(|(_, registration)| Arc::clone(&registration.sink))
                .collect()
        };

        for sink in sinks {
            sink(changes);
        }
    }
}

/// Registrations owned by one observer; unregistered on drop.
pub(crate) struct Registrations {
    hub: Arc<ChangeHub>,
    ids: Vec<RegistrationId>,
}

impl Registrations {
    /// Register `sink` once per source named by `mode`.
    pub(crate) fn new(hub: &Arc<ChangeHub>, mode: &ObservationMode, sink: ChangeSink) -> Self {
        let ids = mode
            .sources()
            .into_iter()
            .map(|source| hub.register(source, Arc::clone(&sink)))
            .collect();
        Self {
            hub: Arc::clone(hub),
            ids,
        }
    }
}

impl Drop for Registrations {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.hub.unregister(id);
        }
    }
}
