//! Store coordinator: the single owner of the on-disk store.

use super::file::{read_store, write_store, StoreSnapshot};
use super::model::Model;
use crate::config::StackConfig;
use crate::context::ChangeSet;
use crate::error::{Result, StackError};
use crate::types::{MergePolicy, ObjectId, ObjectRecord};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Opens a store file against a model and commits change sets to it.
pub struct StoreCoordinator {
    /// Main store file.
    path: PathBuf,

    /// Temporary file used for atomic replacement.
    tmp_path: PathBuf,

    /// Lock file serializing writers across processes.
    lock_path: PathBuf,

    model: Model,

    merge_policy: MergePolicy,

    /// Committed state, mirrored on disk.
    state: Mutex<StoreSnapshot>,
}

impl StoreCoordinator {
    /// Open (or create) the store described by `config`, migrating it to the
    /// current model when the model changed since it was written.
    pub fn open(config: &StackConfig) -> Result<Self> {
        let model = Model::load(&config.model_path)?;
        fs::create_dir_all(&config.store_directory)?;

        let coordinator = Self {
            path: config.database_path(),
            tmp_path: config.sibling_path("store.tmp"),
            lock_path: config.sibling_path("lock"),
            model,
            merge_policy: MergePolicy::default(),
            state: Mutex::new(StoreSnapshot::default()),
        };

        let snapshot = match read_store(&coordinator.path)? {
            Some(mut snapshot) => {
                if snapshot.model_hash != coordinator.model.fingerprint() {
                    let stats = coordinator.model.migrate(&mut snapshot.objects);
                    snapshot.model_hash = coordinator.model.fingerprint().to_string();
                    info!(
                        dropped_objects = stats.dropped_objects,
                        stripped_attributes = stats.stripped_attributes,
                        "migrated store to current model"
                    );
                    coordinator.persist(&snapshot)?;
                }
                snapshot
            }
            None => {
                let snapshot = StoreSnapshot {
                    model_hash: coordinator.model.fingerprint().to_string(),
                    next_key: 1,
                    ..Default::default()
                };
                coordinator.persist(&snapshot)?;
                debug!(path = %coordinator.path.display(), "created new store");
                snapshot
            }
        };

        *coordinator.state.lock() = snapshot;
        Ok(coordinator)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    /// Reserve `count` durable keys.
    pub fn allocate_keys(&self, count: u64) -> Range<u64> {
        let mut state = self.state.lock();
        let start = state.next_key.max(1);
        state.next_key = start + count;
        start..start + count
    }

    /// Committed values of one object.
    pub fn object(&self, id: &ObjectId) -> Option<ObjectRecord> {
        let key = id.durable_key()?;
        self.state
            .lock()
            .objects
            .get(&key)
            .filter(|record| record.entity == id.entity())
            .cloned()
    }

    /// Committed objects of one entity, ordered by key.
    pub fn objects_of(&self, entity: &str) -> Vec<(ObjectId, ObjectRecord)> {
        self.state
            .lock()
            .objects
            .iter()
            .filter(|(_, record)| record.entity == entity)
            .map(|(key, record)| (ObjectId::durable(entity, *key), record.clone()))
            .collect()
    }

    /// Number of committed objects.
    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Validate and persist a change set. Nothing changes on failure.
    pub fn commit(&self, changes: &ChangeSet) -> Result<()> {
        let mut state = self.state.lock();
        let mut next = state.clone();

        for (id, record) in &changes.inserted {
            let key = Self::key_of(id)?;
            self.model.validate(record)?;
            next.objects.insert(key, record.clone());
        }

        for (id, local) in &changes.updated {
            let key = Self::key_of(id)?;
            let stored = next
                .objects
                .get_mut(&key)
                .ok_or_else(|| StackError::ObjectNotFound(id.clone()))?;
            let mut merged = stored.properties.clone();
            self.merge_policy.merge(&mut merged, &local.properties);
            let candidate = ObjectRecord::new(stored.entity.clone(), merged);
            self.model.validate(&candidate)?;
            *stored = candidate;
        }

        for id in changes.deleted.keys() {
            let key = Self::key_of(id)?;
            next.objects.remove(&key);
        }

        self.persist(&next)?;
        *state = next;

        debug!(
            inserted = changes.inserted.len(),
            updated = changes.updated.len(),
            deleted = changes.deleted.len(),
            "committed changes to store"
        );
        Ok(())
    }

    fn key_of(id: &ObjectId) -> Result<u64> {
        id.durable_key().ok_or_else(|| StackError::Validation {
            entity: id.entity().to_string(),
            message: format!("temporary identity {} reached the store", id),
        })
    }

    fn persist(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        lock_file.lock_exclusive()?;
        let result = write_store(&self.path, &self.tmp_path, snapshot);
        let _ = lock_file.unlock();
        result
    }
}
