//! The persistent store underneath the context hierarchy.
//!
//! - `Model`: the entity schema, loaded from a JSON description
//! - `StoreCoordinator`: owns the store file, hands out durable keys and
//!   commits change sets with auto-migration on open
//!
//! Only the background-saving context talks to the coordinator directly.

mod coordinator;
mod file;
mod model;

pub use coordinator::StoreCoordinator;
pub use model::{EntityDescription, MigrationStats, Model};
