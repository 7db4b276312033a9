//! Observers bound to specific objects.
//!
//! The observation mode follows the objects' current contexts: one context
//! gives a single-context observer, several give a multi-context one, and
//! objects without a context fall back to all contexts.

use super::changes::ObservedChanges;
use super::filter::ObjectIdentityFilter;
use super::hub::ChangeHub;
use super::mode::ObservationMode;
use super::observer::ChangeObserver;
use super::publisher::ChangePublisher;
use super::stream::ChangeStream;
use crate::context::ManagedObject;
use std::sync::Arc;

fn object_target(objects: &[ManagedObject]) -> (ObservationMode, ObjectIdentityFilter) {
    let ids = objects.iter().map(|object| match object.permanent_id() {
        Ok(id) => id,
        Err(e) => panic!("cannot observe object {}: {e}", object.object_id()),
    });
    let filter = ObjectIdentityFilter::new(ids.collect::<Vec<_>>());

    let contexts: Vec<_> = objects
        .iter()
        .filter_map(|object| object.context().map(|context| context.id()))
        .collect();
    let mode = if contexts.len() < objects.len() {
        ObservationMode::AllContexts
    } else {
        ObservationMode::from_context_ids(contexts)
    };

    (mode, filter)
}

/// Call `handler` whenever any of `objects` changes.
///
/// # Panics
///
/// Panics if a temporary identity cannot be upgraded, for example when the
/// object is not attached to a context backed by a store. The same holds for
/// [`publish_object_changes`], [`object_changes`] and the per-object helpers.
pub fn observe_objects<H>(
    hub: &Arc<ChangeHub>,
    objects: &[ManagedObject],
    fire_initially: bool,
    handler: H,
) -> ChangeObserver<ObjectIdentityFilter>
where
    H: Fn(&ObservedChanges) + Send + Sync + 'static,
{
    let (mode, filter) = object_target(objects);
    ChangeObserver::new(hub, mode, filter, fire_initially, handler)
}

/// Publisher of changes to any of `objects`.
pub fn publish_object_changes(
    hub: &Arc<ChangeHub>,
    objects: &[ManagedObject],
) -> ChangePublisher<ObjectIdentityFilter> {
    let (mode, filter) = object_target(objects);
    ChangePublisher::new(hub, mode, filter)
}

/// Stream of changes to any of `objects`.
pub fn object_changes(
    hub: &Arc<ChangeHub>,
    objects: &[ManagedObject],
) -> ChangeStream<ObjectIdentityFilter> {
    let (mode, filter) = object_target(objects);
    ChangeStream::new(hub, mode, filter)
}

impl ManagedObject {
    /// Call `handler` whenever this object changes.
    ///
    /// A temporary identity is upgraded to a durable one first.
    pub fn observe<H>(
        &self,
        hub: &Arc<ChangeHub>,
        fire_initially: bool,
        handler: H,
    ) -> ChangeObserver<ObjectIdentityFilter>
    where
        H: Fn(&ObservedChanges) + Send + Sync + 'static,
    {
        observe_objects(hub, std::slice::from_ref(self), fire_initially, handler)
    }

    pub fn publish_changes(&self, hub: &Arc<ChangeHub>) -> ChangePublisher<ObjectIdentityFilter> {
        publish_object_changes(hub, std::slice::from_ref(self))
    }

    pub fn changes(&self, hub: &Arc<ChangeHub>) -> ChangeStream<ObjectIdentityFilter> {
        object_changes(hub, std::slice::from_ref(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ExecutionQueue;
    use crate::types::{ObjectId, ObjectRecord, Properties};

    fn detached(key: u64) -> ManagedObject {
        let id = ObjectId::durable("Widget", key);
        ManagedObject::new(id, ObjectRecord::new("Widget", Properties::new()), None)
    }

    #[test]
    fn test_detached_objects_observe_all_contexts() {
        let (mode, filter) = object_target(&[detached(1), detached(2)]);
        assert_eq!(mode, ObservationMode::AllContexts);
        assert_eq!(filter.ids().len(), 2);
    }

    #[test]
    #[should_panic(expected = "cannot observe object")]
    fn test_detached_temporary_object_cannot_be_observed() {
        let hub = Arc::new(ChangeHub::new(ExecutionQueue::new("test.main")));
        let object = ManagedObject::new(
            ObjectId::temporary("Widget"),
            ObjectRecord::new("Widget", Properties::new()),
            None,
        );
        let _stream = object.changes(&hub);
    }

    #[test]
    fn test_object_stream_registers_once() {
        let hub = Arc::new(ChangeHub::new(ExecutionQueue::new("test.main")));
        let stream = detached(1).changes(&hub);
        assert_eq!(hub.registration_count(), 1);
        drop(stream);
        assert_eq!(hub.registration_count(), 0);
    }
}
