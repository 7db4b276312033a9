//! Predicates deciding which changed objects an observer sees.

use crate::context::ManagedObject;
use crate::types::ObjectId;
use std::collections::{BTreeSet, HashSet};
use tracing::warn;

/// Decides whether a changed object is relevant to an observer.
///
/// Filters are evaluated on the queue of the context that emitted the
/// change, so they must be thread-safe.
pub trait ChangeFilter: Send + Sync + 'static {
    fn include(&self, object: &ManagedObject) -> bool;
}

impl<F> ChangeFilter for F
where
    F: Fn(&ManagedObject) -> bool + Send + Sync + 'static,
{
    fn include(&self, object: &ManagedObject) -> bool {
        self(object)
    }
}

/// Matches objects whose entity is one of a fixed set of names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityNameFilter {
    names: BTreeSet<String>,
}

impl EntityNameFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }
}

impl ChangeFilter for EntityNameFilter {
    fn include(&self, object: &ManagedObject) -> bool {
        self.names.contains(object.entity())
    }
}

/// Matches objects by durable identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectIdentityFilter {
    ids: HashSet<ObjectId>,
}

impl ObjectIdentityFilter {
    /// # Panics
    ///
    /// Panics if any identity is temporary; obtain permanent ids first.
    pub fn new<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = ObjectId>,
    {
        let ids: HashSet<ObjectId> = ids.into_iter().collect();
        if let Some(temporary) = ids.iter().find(|id| id.is_temporary()) {
            panic!("cannot observe temporary object identity {temporary}");
        }
        Self { ids }
    }

    pub fn ids(&self) -> &HashSet<ObjectId> {
        &self.ids
    }
}

impl ChangeFilter for ObjectIdentityFilter {
    fn include(&self, object: &ManagedObject) -> bool {
        match object.permanent_id() {
            Ok(id) => self.ids.contains(&id),
            Err(e) => {
                warn!(object = %object.object_id(), error = %e, "could not obtain permanent id for changed object");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectRecord, Properties};

    fn detached(id: ObjectId) -> ManagedObject {
        let record = ObjectRecord::new(id.entity(), Properties::new());
        ManagedObject::new(id, record, None)
    }

    #[test]
    fn test_entity_name_filter() {
        let filter = EntityNameFilter::new(["Widget"]);
        assert!(filter.include(&detached(ObjectId::durable("Widget", 1))));
        assert!(!filter.include(&detached(ObjectId::durable("Gadget", 1))));
    }

    #[test]
    fn test_identity_filter_matches_durable_ids() {
        let filter = ObjectIdentityFilter::new([ObjectId::durable("Widget", 1)]);
        assert!(filter.include(&detached(ObjectId::durable("Widget", 1))));
        assert!(!filter.include(&detached(ObjectId::durable("Widget", 2))));
    }

    #[test]
    fn test_identity_filter_rejects_unresolvable_temporary_object() {
        let filter = ObjectIdentityFilter::new([ObjectId::durable("Widget", 1)]);
        assert!(!filter.include(&detached(ObjectId::temporary("Widget"))));
    }

    #[test]
    #[should_panic(expected = "temporary object identity")]
    fn test_identity_filter_refuses_temporary_ids() {
        ObjectIdentityFilter::new([ObjectId::temporary("Widget")]);
    }

    #[test]
    fn test_closure_filter() {
        let filter = |object: &ManagedObject| object.entity().starts_with('W');
        assert!(filter.include(&detached(ObjectId::durable("Widget", 1))));
        assert!(!ChangeFilter::include(&filter, &detached(ObjectId::durable("Gadget", 1))));
    }
}
