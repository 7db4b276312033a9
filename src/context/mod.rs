//! Units of work over the persisted object graph.
//!
//! A context holds pending mutations on top of what its parent (or, for the
//! root, the store coordinator) sees. Reads fall through the parent chain;
//! saving pushes the pending changes exactly one level up.
//!
//! Every context is confined to one `ExecutionQueue`. Mutations must run on
//! that queue, which `perform`/`perform_and_wait`/`run` take care of. After
//! each block the accumulated changes are published as one notification.

mod changes;
mod object;

pub use changes::ChangeSet;
pub use object::ManagedObject;

use crate::error::{Result, StackError};
use crate::observation::{ChangeHub, ContextChanges};
use crate::queue::ExecutionQueue;
use crate::storage::StoreCoordinator;
use crate::types::{
    normalize_entity_name, ConcurrencyType, ContextId, Entity, MergePolicy, ObjectId,
    ObjectRecord, Properties, Value,
};
use changes::ChangeLog;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Maximum number of undo steps kept per context.
const UNDO_LEVELS: usize = 64;

/// Per-object validation run when a context saves.
pub type Validator = Arc<dyn Fn(&ManagedObject) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Default)]
struct ContextState {
    /// Changes not yet pushed up.
    changes: ChangeSet,
    /// Changes not yet published to observers.
    unprocessed: ChangeLog,
    /// Temporary identities that were upgraded to durable ones.
    upgraded: HashMap<ObjectId, ObjectId>,
    /// Previous versions of `changes`; `None` when undo is disabled.
    undo: Option<Vec<ChangeSet>>,
    validator: Option<Validator>,
}

impl ContextState {
    fn record_undo(&mut self) {
        if let Some(stack) = self.undo.as_mut() {
            if stack.len() == UNDO_LEVELS {
                stack.remove(0);
            }
            stack.push(self.changes.clone());
        }
    }
}

struct ContextInner {
    id: ContextId,
    name: String,
    concurrency: ConcurrencyType,
    queue: ExecutionQueue,
    main_queue: ExecutionQueue,
    parent: Option<Context>,
    coordinator: Option<Arc<StoreCoordinator>>,
    hub: Arc<ChangeHub>,
    merge_policy: MergePolicy,
    normalize_entity_names: bool,
    state: Mutex<ContextState>,
}

/// Everything needed to build a context.
pub(crate) struct ContextSetup {
    pub name: String,
    pub concurrency: ConcurrencyType,
    pub main_queue: ExecutionQueue,
    pub parent: Option<Context>,
    pub coordinator: Option<Arc<StoreCoordinator>>,
    pub hub: Arc<ChangeHub>,
    pub normalize_entity_names: bool,
    pub undo_enabled: bool,
}

/// A queue-confined unit of work.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub(crate) fn new(setup: ContextSetup) -> Self {
        let id = ContextId::next();
        let queue = match setup.concurrency {
            ConcurrencyType::Main => setup.main_queue.clone(),
            ConcurrencyType::Private => {
                ExecutionQueue::new(format!("objstack.{}.{}", setup.name, id))
            }
        };

        let state = ContextState {
            undo: setup.undo_enabled.then(Vec::new),
            ..Default::default()
        };

        Self {
            inner: Arc::new(ContextInner {
                id,
                name: setup.name,
                concurrency: setup.concurrency,
                queue,
                main_queue: setup.main_queue,
                parent: setup.parent,
                coordinator: setup.coordinator,
                hub: setup.hub,
                merge_policy: MergePolicy::PropertyObjectTrump,
                normalize_entity_names: setup.normalize_entity_names,
                state: Mutex::new(state),
            }),
        }
    }

    /// Create a context whose parent is this one, with undo tracking off.
    pub fn new_child(&self, concurrency: ConcurrencyType) -> Context {
        Context::new(ContextSetup {
            name: format!("child-of-{}", self.inner.id),
            concurrency,
            main_queue: self.inner.main_queue.clone(),
            parent: Some(self.clone()),
            coordinator: None,
            hub: Arc::clone(&self.inner.hub),
            normalize_entity_names: self.inner.normalize_entity_names,
            undo_enabled: false,
        })
    }

    // --- Accessors ---

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn concurrency_type(&self) -> ConcurrencyType {
        self.inner.concurrency
    }

    pub fn queue(&self) -> &ExecutionQueue {
        &self.inner.queue
    }

    pub fn parent(&self) -> Option<&Context> {
        self.inner.parent.as_ref()
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.inner.merge_policy
    }

    pub fn hub(&self) -> &Arc<ChangeHub> {
        &self.inner.hub
    }

    /// Whether this context talks to the store coordinator directly.
    pub fn is_root(&self) -> bool {
        self.inner.coordinator.is_some()
    }

    pub fn is_undo_enabled(&self) -> bool {
        self.inner.state.lock().undo.is_some()
    }

    /// Entity name for a persisted type, normalized if the stack asks for it.
    pub fn entity_name<T: Entity>(&self) -> &'static str {
        if self.inner.normalize_entity_names {
            normalize_entity_name(T::ENTITY_NAME)
        } else {
            T::ENTITY_NAME
        }
    }

    // --- Queue access ---

    /// Run `work` on the context's queue without waiting.
    pub fn perform<F>(&self, work: F)
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        let context = self.clone();
        self.inner.queue.submit(move || {
            work(&context);
            context.process_pending_changes();
        });
    }

    /// Run `work` on the context's queue and wait for its result.
    pub fn perform_and_wait<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Context) -> T + Send + 'static,
        T: Send + 'static,
    {
        let context = self.clone();
        self.inner.queue.sync(move || {
            let result = work(&context);
            context.process_pending_changes();
            result
        })
    }

    /// Run `work` on the context's queue, resolving with its result.
    pub fn run<T, F>(&self, work: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce(&Context) -> T + Send + 'static,
        T: Send + 'static,
    {
        let context = self.clone();
        self.inner.queue.run(move || {
            let result = work(&context);
            context.process_pending_changes();
            result
        })
    }

    fn assert_confined(&self) {
        debug_assert!(
            self.inner.queue.is_current(),
            "context `{}` mutated off its execution queue",
            self.inner.name
        );
    }

    // --- Mutations ---

    /// Insert a new object. It carries a temporary identity until saved.
    pub fn insert(&self, entity: &str, properties: Properties) -> ManagedObject {
        self.assert_confined();

        let id = ObjectId::temporary(entity);
        let record = ObjectRecord::new(entity, properties);

        let mut state = self.inner.state.lock();
        state.record_undo();
        state.changes.inserted.insert(id.clone(), record.clone());
        state.unprocessed.inserted.push(id.clone());
        drop(state);

        ManagedObject::new(id, record, Some(self.clone()))
    }

    /// Insert a new object of a persisted type.
    pub fn insert_entity<T: Entity>(&self, properties: Properties) -> ManagedObject {
        self.insert(self.entity_name::<T>(), properties)
    }

    /// Set one property of an existing object.
    pub fn set(&self, id: &ObjectId, key: &str, value: Value) -> Result<()> {
        self.assert_confined();
        let id = self.resolve_id(id);

        let known_locally = {
            let state = self.inner.state.lock();
            if state.changes.deleted.contains_key(&id) {
                return Err(StackError::ObjectNotFound(id));
            }
            state.changes.inserted.contains_key(&id) || state.changes.updated.contains_key(&id)
        };
        if !known_locally && self.lookup_parent(&id).is_none() {
            return Err(StackError::ObjectNotFound(id));
        }

        let mut state = self.inner.state.lock();
        state.record_undo();
        if let Some(record) = state.changes.inserted.get_mut(&id) {
            record.properties.insert(key.to_string(), value);
        } else {
            state
                .changes
                .updated
                .entry(id.clone())
                .or_insert_with(|| ObjectRecord::new(id.entity(), Properties::new()))
                .properties
                .insert(key.to_string(), value);
        }
        state.unprocessed.updated.push(id);
        Ok(())
    }

    /// Delete an object.
    pub fn delete(&self, id: &ObjectId) -> Result<()> {
        self.assert_confined();
        let id = self.resolve_id(id);
        let last_known = self
            .lookup(&id)
            .ok_or_else(|| StackError::ObjectNotFound(id.clone()))?;

        let mut state = self.inner.state.lock();
        state.record_undo();
        if state.changes.inserted.remove(&id).is_none() {
            state.changes.updated.remove(&id);
            state.changes.deleted.insert(id.clone(), last_known.clone());
        }
        state.unprocessed.deleted.push((id, last_known));
        Ok(())
    }

    /// Discard every pending change.
    pub fn rollback(&self) {
        self.assert_confined();
        let mut state = self.inner.state.lock();
        state.changes = ChangeSet::default();
        state.unprocessed = ChangeLog::default();
        state.upgraded.clear();
        if let Some(stack) = state.undo.as_mut() {
            stack.clear();
        }
        debug!(context = %self.inner.name, "rolled back context");
    }

    /// Revert the most recent mutation. Returns false if there is nothing to
    /// undo or undo tracking is disabled. Reverted objects are reported with
    /// the next change notification.
    pub fn undo(&self) -> bool {
        self.assert_confined();
        let mut state = self.inner.state.lock();
        match state.undo.as_mut().and_then(Vec::pop) {
            Some(previous) => {
                let reverted = state.changes.revert_to(previous);
                state.unprocessed.append(reverted);
                true
            }
            None => false,
        }
    }

    /// Install a validation rule checked for every inserted or updated
    /// object when this context saves.
    pub fn set_validator<F>(&self, validator: F)
    where
        F: Fn(&ManagedObject) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.inner.state.lock().validator = Some(Arc::new(validator));
    }

    pub fn clear_validator(&self) {
        self.inner.state.lock().validator = None;
    }

    // --- Reads ---

    pub fn has_changes(&self) -> bool {
        !self.inner.state.lock().changes.is_empty()
    }

    /// Copy of the pending changes.
    pub fn pending_changes(&self) -> ChangeSet {
        self.inner.state.lock().changes.clone()
    }

    /// Look up one object as this context sees it.
    pub fn object(&self, id: &ObjectId) -> Option<ManagedObject> {
        let id = self.resolve_id(id);
        self.lookup(&id)
            .map(|record| ManagedObject::new(id, record, Some(self.clone())))
    }

    /// All objects of an entity as this context sees them, ordered by id.
    pub fn fetch(&self, entity: &str) -> Vec<ManagedObject> {
        self.lookup_entity(entity)
            .into_iter()
            .map(|(id, record)| ManagedObject::new(id, record, Some(self.clone())))
            .collect()
    }

    pub fn fetch_entity<T: Entity>(&self) -> Vec<ManagedObject> {
        self.fetch(self.entity_name::<T>())
    }

    pub fn count(&self, entity: &str) -> usize {
        self.lookup_entity(entity).len()
    }

    fn lookup(&self, id: &ObjectId) -> Option<ObjectRecord> {
        let local = {
            let state = self.inner.state.lock();
            if state.changes.deleted.contains_key(id) {
                return None;
            }
            if let Some(record) = state.changes.inserted.get(id) {
                return Some(record.clone());
            }
            state.changes.updated.get(id).cloned()
        };

        let mut record = self.lookup_parent(id)?;
        if let Some(local) = local {
            self.inner
                .merge_policy
                .merge(&mut record.properties, &local.properties);
        }
        Some(record)
    }

    fn lookup_parent(&self, id: &ObjectId) -> Option<ObjectRecord> {
        match (&self.inner.parent, &self.inner.coordinator) {
            (Some(parent), _) => parent.lookup(id),
            (None, Some(coordinator)) => coordinator.object(id),
            (None, None) => None,
        }
    }

    fn lookup_entity(&self, entity: &str) -> BTreeMap<ObjectId, ObjectRecord> {
        let mut objects = match (&self.inner.parent, &self.inner.coordinator) {
            (Some(parent), _) => parent.lookup_entity(entity),
            (None, Some(coordinator)) => coordinator.objects_of(entity).into_iter().collect(),
            (None, None) => BTreeMap::new(),
        };

        let state = self.inner.state.lock();
        for (id, local) in &state.changes.updated {
            if let Some(record) = objects.get_mut(id) {
                self.inner
                    .merge_policy
                    .merge(&mut record.properties, &local.properties);
            }
        }
        for id in state.changes.deleted.keys() {
            objects.remove(id);
        }
        for (id, record) in &state.changes.inserted {
            if record.entity == entity {
                objects.insert(id.clone(), record.clone());
            }
        }
        objects
    }

    // --- Identities ---

    /// Follow a temporary identity to the durable one it was upgraded to,
    /// here or in any ancestor.
    pub fn resolve_id(&self, id: &ObjectId) -> ObjectId {
        if !id.is_temporary() {
            return id.clone();
        }
        let local = self.inner.state.lock().upgraded.get(id).cloned();
        match (local, &self.inner.parent) {
            (Some(durable), _) => durable,
            (None, Some(parent)) => parent.resolve_id(id),
            (None, None) => id.clone(),
        }
    }

    /// Rekey pending updates and deletes whose temporary identity an
    /// ancestor upgraded after they were recorded here.
    fn rekey_stale_ids(&self) {
        let stale: Vec<ObjectId> = {
            let state = self.inner.state.lock();
            state
                .changes
                .updated
                .keys()
                .chain(state.changes.deleted.keys())
                .filter(|id| id.is_temporary())
                .cloned()
                .collect()
        };

        let upgrades: Vec<(ObjectId, ObjectId)> = stale
            .into_iter()
            .filter_map(|id| {
                let durable = self.resolve_id(&id);
                (durable != id).then_some((id, durable))
            })
            .collect();
        if upgrades.is_empty() {
            return;
        }

        let mut state = self.inner.state.lock();
        for (temporary, durable) in upgrades {
            if let Some(mut stale) = state.changes.updated.remove(&temporary) {
                if let Some(newer) = state.changes.updated.remove(&durable) {
                    self.inner
                        .merge_policy
                        .merge(&mut stale.properties, &newer.properties);
                }
                state.changes.updated.insert(durable.clone(), stale);
            }
            if let Some(record) = state.changes.deleted.remove(&temporary) {
                state.changes.updated.remove(&durable);
                state.changes.deleted.insert(durable.clone(), record);
            }
            state.upgraded.insert(temporary, durable);
        }
    }

    /// Replace temporary identities of objects inserted here with durable
    /// ones allocated by the store. Durable identities pass through.
    pub fn obtain_permanent_ids(&self, ids: &[ObjectId]) -> Result<Vec<ObjectId>> {
        let mut resolved = Vec::with_capacity(ids.len());
        let mut coordinator = None;
        let mut state = self.inner.state.lock();

        for id in ids {
            if !id.is_temporary() {
                resolved.push(id.clone());
                continue;
            }
            if let Some(durable) = state.upgraded.get(id) {
                resolved.push(durable.clone());
                continue;
            }

            let record = state
                .changes
                .inserted
                .remove(id)
                .ok_or_else(|| StackError::ObjectNotFound(id.clone()))?;

            if coordinator.is_none() {
                coordinator = self.root_coordinator();
            }
            let key = match &coordinator {
                Some(coordinator) => coordinator.allocate_keys(1).start,
                None => {
                    state.changes.inserted.insert(id.clone(), record);
                    return Err(StackError::NoPersistentStore);
                }
            };

            let durable = ObjectId::durable(id.entity(), key);
            state.changes.inserted.insert(durable.clone(), record);
            if let Some(stack) = state.undo.as_mut() {
                for snapshot in stack.iter_mut() {
                    if let Some(record) = snapshot.inserted.remove(id) {
                        snapshot.inserted.insert(durable.clone(), record);
                    }
                }
            }
            for pending in state.unprocessed.inserted.iter_mut() {
                if pending == id {
                    *pending = durable.clone();
                }
            }
            for pending in state.unprocessed.updated.iter_mut() {
                if pending == id {
                    *pending = durable.clone();
                }
            }
            state.upgraded.insert(id.clone(), durable.clone());
            resolved.push(durable);
        }

        Ok(resolved)
    }

    fn root_coordinator(&self) -> Option<Arc<StoreCoordinator>> {
        let mut current = self;
        loop {
            if let Some(coordinator) = &current.inner.coordinator {
                return Some(Arc::clone(coordinator));
            }
            current = current.inner.parent.as_ref()?;
        }
    }

    // --- Notifications ---

    /// Publish everything changed since the last notification as one event.
    pub fn process_pending_changes(&self) {
        let log = std::mem::take(&mut self.inner.state.lock().unprocessed);
        if log.is_empty() {
            return;
        }

        let deleted_ids: HashSet<&ObjectId> = log.deleted.iter().map(|(id, _)| id).collect();
        let inserted_ids: HashSet<&ObjectId> = log.inserted.iter().collect();

        let mut seen = HashSet::new();
        let inserted: Vec<ManagedObject> = log
            .inserted
            .iter()
            .filter(|id| !deleted_ids.contains(id) && seen.insert(*id))
            .filter_map(|id| self.object(id))
            .collect();

        let mut seen = HashSet::new();
        let updated: Vec<ManagedObject> = log
            .updated
            .iter()
            .filter(|id| {
                !deleted_ids.contains(id) && !inserted_ids.contains(id) && seen.insert(*id)
            })
            .filter_map(|id| self.object(id))
            .collect();

        let mut seen = HashSet::new();
        let deleted: Vec<ManagedObject> = log
            .deleted
            .iter()
            .filter(|(id, _)| !inserted_ids.contains(id) && seen.insert(id))
            .map(|(id, record)| ManagedObject::new(id.clone(), record.clone(), Some(self.clone())))
            .collect();

        let changes = ContextChanges {
            context: self.inner.id,
            inserted,
            updated,
            deleted,
        };
        if !changes.is_empty() {
            self.inner.hub.broadcast(&changes);
        }
    }

    // --- Saving ---

    /// Push pending changes one level up: into the parent, or into the
    /// store for the root context. Must run on the context's queue.
    pub(crate) fn save_changes(&self) -> Result<()> {
        self.process_pending_changes();

        let temporary: Vec<ObjectId> = self
            .inner
            .state
            .lock()
            .changes
            .inserted
            .keys()
            .filter(|id| id.is_temporary())
            .cloned()
            .collect();
        if !temporary.is_empty() {
            self.obtain_permanent_ids(&temporary)?;
        }
        self.rekey_stale_ids();

        let changes = self.pending_changes();
        if changes.is_empty() {
            return Ok(());
        }
        self.validate(&changes)?;

        match (&self.inner.parent, &self.inner.coordinator) {
            (Some(parent), _) => parent.absorb_child(changes),
            (None, Some(coordinator)) => coordinator.commit(&changes)?,
            (None, None) => return Err(StackError::NoPersistentStore),
        }

        let mut state = self.inner.state.lock();
        state.changes = ChangeSet::default();
        if let Some(stack) = state.undo.as_mut() {
            stack.clear();
        }
        Ok(())
    }

    fn validate(&self, changes: &ChangeSet) -> Result<()> {
        let validator = match self.inner.state.lock().validator.clone() {
            Some(validator) => validator,
            None => return Ok(()),
        };

        let candidates = changes
            .inserted
            .keys()
            .chain(changes.updated.keys())
            .filter_map(|id| self.object(id));
        for object in candidates {
            validator(&object).map_err(|message| StackError::Validation {
                entity: object.entity().to_string(),
                message,
            })?;
        }
        Ok(())
    }

    /// Take a child's saved changes and notify observers on our own queue.
    fn absorb_child(&self, changes: ChangeSet) {
        {
            let mut state = self.inner.state.lock();
            let log = state.changes.absorb(changes, self.inner.merge_policy);
            state.unprocessed.append(log);
        }
        self.perform(|_| {});
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({}#{})", self.inner.name, self.inner.id)
    }
}
