//! # objstack
//!
//! A persistence-context hierarchy over an object store, with save
//! propagation and filtered change observation.
//!
//! ## Core Concepts
//!
//! - **Contexts**: queue-confined units of work; reads fall through to the
//!   parent, saves push changes one level up
//! - **Stack**: owns the store coordinator, the background-saving root
//!   context and the main context, built lazily and reset on reconfiguration
//! - **Save propagation**: a save completes only once every ancestor has
//!   committed, with optional rollback down the chain on failure
//! - **Observation**: filtered change notifications delivered as callbacks,
//!   channel subscriptions or async streams
//!
//! ## Example
//!
//! ```ignore
//! use objstack::{CoreStack, ObservationMode, StackConfig};
//! use serde_json::json;
//!
//! let stack = CoreStack::new(StackConfig::new("model.json", "./data", "Shop"));
//!
//! let _observer = stack.observe_entity::<Widget, _>(ObservationMode::AllContexts, false, |changes| {
//!     println!("{} widgets inserted", changes.inserted().len());
//! });
//!
//! let context = stack.create_temporary_background_context();
//! context.perform_and_wait(|ctx| {
//!     ctx.insert_entity::<Widget>([("name".to_string(), json!("bolt"))].into());
//! })?;
//!
//! let saved = futures::executor::block_on(stack.save_async(&context, true));
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod observation;
pub mod queue;
pub mod stack;
pub mod storage;
pub mod types;

// Re-exports
pub use config::{StackConfig, StackOptions};
pub use context::{ChangeSet, Context, ManagedObject, Validator};
pub use error::{Result, StackError};
pub use observation::{
    ChangeFilter, ChangeHub, ChangeObserver, ChangePublisher, ChangeStream, ChangeSubscription,
    ContextChanges, EntityNameFilter, ObjectIdentityFilter, ObservationMode, ObservedChanges,
};
pub use queue::ExecutionQueue;
pub use stack::CoreStack;
pub use storage::{EntityDescription, Model, StoreCoordinator};
pub use types::*;
