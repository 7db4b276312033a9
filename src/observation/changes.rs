use super::filter::ChangeFilter;
use super::hub::ContextChanges;
use crate::context::ManagedObject;
use crate::types::ObjectId;
use std::collections::BTreeSet;

/// Identities of the objects an observer cares about, grouped by kind of
/// change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservedChanges {
    inserted: BTreeSet<ObjectId>,
    updated: BTreeSet<ObjectId>,
    deleted: BTreeSet<ObjectId>,
}

impl ObservedChanges {
    pub fn inserted(&self) -> &BTreeSet<ObjectId> {
        &self.inserted
    }

    pub fn updated(&self) -> &BTreeSet<ObjectId> {
        &self.updated
    }

    pub fn deleted(&self) -> &BTreeSet<ObjectId> {
        &self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of identities across all kinds.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

fn matching_ids<F>(objects: &[ManagedObject], filter: &F) -> BTreeSet<ObjectId>
where
    F: ChangeFilter + ?Sized,
{
    objects
        .iter()
        .filter(|object| filter.include(object))
        .map(ManagedObject::object_id)
        .collect()
}

/// Apply a filter to a raw change event. `None` when nothing matched.
///
/// Shared by every delivery style so they behave identically.
pub(crate) fn filtered_changes<F>(changes: &ContextChanges, filter: &F) -> Option<ObservedChanges>
where
    F: ChangeFilter + ?Sized,
{
    let observed = ObservedChanges {
        inserted: matching_ids(&changes.inserted, filter),
        updated: matching_ids(&changes.updated, filter),
        deleted: matching_ids(&changes.deleted, filter),
    };
    (!observed.is_empty()).then_some(observed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::filter::EntityNameFilter;
    use crate::types::{ContextId, ObjectRecord, Properties};

    fn detached(entity: &str, key: u64) -> ManagedObject {
        let id = ObjectId::durable(entity, key);
        ManagedObject::new(id, ObjectRecord::new(entity, Properties::new()), None)
    }

    #[test]
    fn test_filtered_changes_keeps_matching_objects() {
        let changes = ContextChanges {
            context: ContextId(1),
            inserted: vec![detached("Widget", 1), detached("Gadget", 2)],
            updated: vec![detached("Widget", 3)],
            deleted: vec![detached("Gadget", 4)],
        };

        let observed = filtered_changes(&changes, &EntityNameFilter::new(["Widget"])).unwrap();
        assert_eq!(observed.inserted().len(), 1);
        assert!(observed.inserted().contains(&ObjectId::durable("Widget", 1)));
        assert!(observed.updated().contains(&ObjectId::durable("Widget", 3)));
        assert!(observed.deleted().is_empty());
        assert_eq!(observed.len(), 2);
    }

    #[test]
    fn test_filtered_changes_none_when_nothing_matches() {
        let changes = ContextChanges {
            context: ContextId(1),
            inserted: vec![detached("Gadget", 2)],
            updated: Vec::new(),
            deleted: Vec::new(),
        };
        assert!(filtered_changes(&changes, &EntityNameFilter::new(["Widget"])).is_none());
    }
}
