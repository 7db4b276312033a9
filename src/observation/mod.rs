//! Change observation.
//!
//! Contexts raise one raw `ContextChanges` event per processed block of
//! work through the `ChangeHub`. Observers register with the hub for a set
//! of contexts, run each event through a `ChangeFilter` and receive the
//! surviving identities as `ObservedChanges`, in one of three styles:
//!
//! - `ChangeObserver`: a callback dispatched on a delivery queue
//! - `ChangePublisher`: multicast subscriptions backed by channels
//! - `ChangeStream`: a `futures::Stream`
//!
//! All three share the same filtering step, and every one of them
//! deregisters when dropped.

mod changes;
mod filter;
mod hub;
mod mode;
mod objects;
mod observer;
mod publisher;
mod stream;

pub use changes::ObservedChanges;
pub use filter::{ChangeFilter, EntityNameFilter, ObjectIdentityFilter};
pub use hub::{ChangeHub, ChangeSink, ContextChanges, NotificationSource, RegistrationId};
pub use mode::ObservationMode;
pub use objects::{object_changes, observe_objects, publish_object_changes};
pub use observer::{ChangeHandler, ChangeObserver};
pub use publisher::{ChangePublisher, ChangeSubscription};
pub use stream::ChangeStream;
