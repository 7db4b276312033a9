//! Pending-change bookkeeping for a context.

use crate::types::{MergePolicy, ObjectId, ObjectRecord};
use std::collections::BTreeMap;

/// Mutations a context has not yet pushed to its parent or the store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    /// Newly inserted objects with their full values.
    pub inserted: BTreeMap<ObjectId, ObjectRecord>,
    /// Existing objects; only the locally set properties are held.
    pub updated: BTreeMap<ObjectId, ObjectRecord>,
    /// Deleted objects with their last known values.
    pub deleted: BTreeMap<ObjectId, ObjectRecord>,
}

/// Identities touched since the last change notification.
#[derive(Debug, Default)]
pub(crate) struct ChangeLog {
    pub inserted: Vec<ObjectId>,
    pub updated: Vec<ObjectId>,
    /// Deleted identities with their last known values.
    pub deleted: Vec<(ObjectId, ObjectRecord)>,
}

impl ChangeLog {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn append(&mut self, other: ChangeLog) {
        self.inserted.extend(other.inserted);
        self.updated.extend(other.updated);
        self.deleted.extend(other.deleted);
    }
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of changed objects.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    /// Merge a child's saved changes into this (parent) change set.
    pub(crate) fn absorb(&mut self, child: ChangeSet, policy: MergePolicy) -> ChangeLog {
        let mut outcome = ChangeLog::default();

        for (id, record) in child.inserted {
            self.inserted.insert(id.clone(), record);
            outcome.inserted.push(id);
        }

        for (id, local) in child.updated {
            if self.deleted.contains_key(&id) {
                continue;
            }
            if let Some(inserted) = self.inserted.get_mut(&id) {
                policy.merge(&mut inserted.properties, &local.properties);
            } else {
                let entry = self
                    .updated
                    .entry(id.clone())
                    .or_insert_with(|| ObjectRecord::new(local.entity.clone(), Default::default()));
                policy.merge(&mut entry.properties, &local.properties);
            }
            outcome.updated.push(id);
        }

        for (id, last_known) in child.deleted {
            if self.inserted.remove(&id).is_none() {
                self.updated.remove(&id);
                self.deleted.insert(id.clone(), last_known.clone());
            }
            outcome.deleted.push((id, last_known));
        }

        outcome
    }

    /// Replace this change set with an earlier one, reporting the objects
    /// whose visible state changes as a result.
    pub(crate) fn revert_to(&mut self, earlier: ChangeSet) -> ChangeLog {
        let mut outcome = ChangeLog::default();

        for (id, record) in &self.inserted {
            match earlier.inserted.get(id) {
                None => outcome.deleted.push((id.clone(), record.clone())),
                Some(previous) if previous != record => outcome.updated.push(id.clone()),
                Some(_) => {}
            }
        }
        for id in earlier.inserted.keys() {
            if !self.inserted.contains_key(id) {
                outcome.inserted.push(id.clone());
            }
        }

        for (id, record) in &self.deleted {
            if !earlier.deleted.contains_key(id) {
                outcome.inserted.push(id.clone());
            } else if earlier.deleted.get(id) != Some(record) {
                outcome.updated.push(id.clone());
            }
        }
        for (id, record) in &earlier.deleted {
            if !self.deleted.contains_key(id) {
                outcome.deleted.push((id.clone(), record.clone()));
            }
        }

        let touched = self.updated.keys().chain(earlier.updated.keys());
        for id in touched {
            if self.updated.get(id) != earlier.updated.get(id) && !outcome.updated.contains(id) {
                outcome.updated.push(id.clone());
            }
        }

        *self = earlier;
        outcome
    }
}
