//! The stack manager.
//!
//! `CoreStack` owns the canonical context hierarchy:
//!
//! ```text
//! StoreCoordinator <- background context (private queue)
//!                       <- main context (main queue)
//!                            <- temporary contexts
//! ```
//!
//! The hierarchy is built lazily on first access and torn down as a whole
//! when the configuration changes or connections are closed.
//! Reconfiguring is not synchronized with context use; callers serialize
//! the two.

mod save;

pub use save::{save, save_async};

use crate::config::StackConfig;
use crate::context::{Context, ContextSetup, ManagedObject};
use crate::error::{Result, StackError};
use crate::observation::{
    self, ChangeHub, ChangeObserver, ChangePublisher, ChangeStream, EntityNameFilter,
    ObjectIdentityFilter, ObservationMode, ObservedChanges,
};
use crate::queue::ExecutionQueue;
use crate::storage::StoreCoordinator;
use crate::types::{normalize_entity_name, ConcurrencyType, Entity};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{debug, error};

/// The lazily built part of a stack.
struct Hierarchy {
    coordinator: Arc<StoreCoordinator>,
    background: Context,
    main: Context,
}

/// Owner of one context hierarchy and its store.
pub struct CoreStack {
    /// Active configuration.
    config: RwLock<StackConfig>,

    /// Queue of the main context and the default delivery queue.
    main_queue: ExecutionQueue,

    /// Change notification registry shared by every context.
    hub: Arc<ChangeHub>,

    /// Built on first access; `None` after a reset.
    hierarchy: Mutex<Option<Arc<Hierarchy>>>,
}

impl CoreStack {
    /// Create a stack. Nothing is opened until a context is requested.
    pub fn new(config: StackConfig) -> Self {
        let main_queue = ExecutionQueue::new("objstack.main");
        let hub = Arc::new(ChangeHub::new(main_queue.clone()));
        Self {
            config: RwLock::new(config),
            main_queue,
            hub,
            hierarchy: Mutex::new(None),
        }
    }

    pub fn configuration(&self) -> StackConfig {
        self.config.read().clone()
    }

    /// Swap the configuration. The current hierarchy is discarded and the
    /// next access rebuilds it.
    pub fn set_configuration(&self, config: StackConfig) {
        *self.config.write() = config;
        self.close_connections();
    }

    pub fn main_queue(&self) -> &ExecutionQueue {
        &self.main_queue
    }

    pub fn hub(&self) -> &Arc<ChangeHub> {
        &self.hub
    }

    /// Entity name for a persisted type under this stack's options.
    pub fn entity_name<T: Entity>(&self) -> &'static str {
        if self.config.read().options.normalize_entity_names {
            normalize_entity_name(T::ENTITY_NAME)
        } else {
            T::ENTITY_NAME
        }
    }

    // --- Hierarchy ---

    fn hierarchy(&self) -> Result<Arc<Hierarchy>> {
        let mut slot = self.hierarchy.lock();
        if let Some(hierarchy) = slot.as_ref() {
            return Ok(Arc::clone(hierarchy));
        }

        let config = self.config.read().clone();
        let hierarchy = Arc::new(self.build_hierarchy(&config)?);
        *slot = Some(Arc::clone(&hierarchy));
        Ok(hierarchy)
    }

    fn build_hierarchy(&self, config: &StackConfig) -> Result<Hierarchy> {
        config.validate()?;
        let coordinator = Arc::new(open_coordinator(config)?);
        let normalize_entity_names = config.options.normalize_entity_names;

        let background = Context::new(ContextSetup {
            name: "background".to_string(),
            concurrency: ConcurrencyType::Private,
            main_queue: self.main_queue.clone(),
            parent: None,
            coordinator: Some(Arc::clone(&coordinator)),
            hub: Arc::clone(&self.hub),
            normalize_entity_names,
            undo_enabled: false,
        });
        let main = Context::new(ContextSetup {
            name: "main".to_string(),
            concurrency: ConcurrencyType::Main,
            main_queue: self.main_queue.clone(),
            parent: Some(background.clone()),
            coordinator: None,
            hub: Arc::clone(&self.hub),
            normalize_entity_names,
            undo_enabled: true,
        });

        debug!(store = %coordinator.path().display(), "built context hierarchy");
        Ok(Hierarchy {
            coordinator,
            background,
            main,
        })
    }

    /// The main context, opening the store if needed.
    pub fn try_main_context(&self) -> Result<Context> {
        Ok(self.hierarchy()?.main.clone())
    }

    /// The main context, opening the store if needed.
    ///
    /// # Panics
    ///
    /// Panics if the store cannot be opened and clearing it is not allowed,
    /// or if it still cannot be opened after clearing.
    pub fn main_context(&self) -> Context {
        match self.try_main_context() {
            Ok(context) => context,
            Err(e) => {
                error!(error = %e, "unable to open persistent store");
                panic!("unable to open persistent store: {e}");
            }
        }
    }

    /// The root context that commits to the store.
    pub fn background_context(&self) -> Result<Context> {
        Ok(self.hierarchy()?.background.clone())
    }

    /// The store coordinator of the current hierarchy.
    pub fn coordinator(&self) -> Result<Arc<StoreCoordinator>> {
        Ok(Arc::clone(&self.hierarchy()?.coordinator))
    }

    fn temporary_context(&self, concurrency: ConcurrencyType, name: &str) -> Context {
        let main = self.main_context();
        Context::new(ContextSetup {
            name: name.to_string(),
            concurrency,
            main_queue: self.main_queue.clone(),
            parent: Some(main),
            coordinator: None,
            hub: Arc::clone(&self.hub),
            normalize_entity_names: self.config.read().options.normalize_entity_names,
            undo_enabled: false,
        })
    }

    /// A fresh child of the main context on the main queue.
    pub fn create_temporary_main_context(&self) -> Context {
        self.temporary_context(ConcurrencyType::Main, "temporary-main")
    }

    /// A fresh child of the main context on its own private queue.
    pub fn create_temporary_background_context(&self) -> Context {
        self.temporary_context(ConcurrencyType::Private, "temporary-background")
    }

    /// Drop the hierarchy; the next access reopens the store.
    pub fn close_connections(&self) {
        if self.hierarchy.lock().take().is_some() {
            debug!("closed context hierarchy");
        }
    }

    /// Delete every file in the store directory prefixed by the storage
    /// identifier. A missing directory is not an error; an invalid
    /// configuration is, and nothing is deleted then.
    pub fn clear_data_store(&self) -> Result<()> {
        let config = self.config.read().clone();
        clear_store_files(&config)
    }

    // --- Saving ---

    /// See [`save`].
    pub fn save<F>(&self, context: &Context, rollback: bool, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        save::save(context, rollback, completion);
    }

    pub fn save_main_context<F>(&self, rollback: bool, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        save::save(&self.main_context(), rollback, completion);
    }

    /// See [`save_async`].
    pub fn save_async(&self, context: &Context, rollback: bool) -> BoxFuture<'static, bool> {
        save::save_async(context, rollback)
    }

    pub fn save_main_context_async(&self, rollback: bool) -> BoxFuture<'static, bool> {
        save::save_async(&self.main_context(), rollback)
    }

    // --- Observation ---

    fn entity_filter<T: Entity>(&self) -> EntityNameFilter {
        EntityNameFilter::new([self.entity_name::<T>()])
    }

    /// Call `handler` whenever objects of type `T` change.
    pub fn observe_entity<T, H>(
        &self,
        mode: ObservationMode,
        fire_initially: bool,
        handler: H,
    ) -> ChangeObserver<EntityNameFilter>
    where
        T: Entity,
        H: Fn(&ObservedChanges) + Send + Sync + 'static,
    {
        ChangeObserver::new(&self.hub, mode, self.entity_filter::<T>(), fire_initially, handler)
    }

    pub fn publish_entity_changes<T: Entity>(
        &self,
        mode: ObservationMode,
    ) -> ChangePublisher<EntityNameFilter> {
        ChangePublisher::new(&self.hub, mode, self.entity_filter::<T>())
    }

    pub fn entity_changes<T: Entity>(&self, mode: ObservationMode) -> ChangeStream<EntityNameFilter> {
        ChangeStream::new(&self.hub, mode, self.entity_filter::<T>())
    }

    pub fn observe_objects<H>(
        &self,
        objects: &[ManagedObject],
        fire_initially: bool,
        handler: H,
    ) -> ChangeObserver<ObjectIdentityFilter>
    where
        H: Fn(&ObservedChanges) + Send + Sync + 'static,
    {
        observation::observe_objects(&self.hub, objects, fire_initially, handler)
    }

    pub fn publish_object_changes(
        &self,
        objects: &[ManagedObject],
    ) -> ChangePublisher<ObjectIdentityFilter> {
        observation::publish_object_changes(&self.hub, objects)
    }

    pub fn object_changes(&self, objects: &[ManagedObject]) -> ChangeStream<ObjectIdentityFilter> {
        observation::object_changes(&self.hub, objects)
    }
}

fn open_coordinator(config: &StackConfig) -> Result<StoreCoordinator> {
    let first = match StoreCoordinator::open(config) {
        Ok(coordinator) => return Ok(coordinator),
        Err(e) => e,
    };

    if !config.options.clear_store_on_open_failure {
        return Err(StackError::StoreOpen(first.to_string()));
    }

    error!(
        store = %config.database_path().display(),
        error = %first,
        "failed to open store; clearing it and retrying"
    );
    clear_store_files(config)?;
    StoreCoordinator::open(config).map_err(|e| StackError::StoreOpen(e.to_string()))
}

fn clear_store_files(config: &StackConfig) -> Result<()> {
    // An empty identifier would prefix-match every entry.
    config.validate()?;

    let entries = match fs::read_dir(&config.store_directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        if !entry
            .file_name()
            .to_string_lossy()
            .starts_with(config.store_identifier.as_str())
        {
            continue;
        }

        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        debug!(path = %path.display(), "removed store file");
    }
    Ok(())
}
