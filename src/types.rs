//! Core types shared by contexts, the store and observers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use serde_json::Value;

/// Property values of a single object, keyed by attribute name.
pub type Properties = BTreeMap<String, Value>;

static NEXT_TEMPORARY_KEY: AtomicU64 = AtomicU64::new(1);
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Key part of an object identity.
///
/// Temporary keys are handed out by contexts on insert. Durable keys are
/// allocated by the store coordinator and never change afterwards.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKey {
    Temporary(u64),
    Durable(u64),
}

/// Identity of a persisted object.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    entity: String,
    key: ObjectKey,
}

impl ObjectId {
    /// Allocate a fresh temporary identity for a newly inserted object.
    pub fn temporary(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            key: ObjectKey::Temporary(NEXT_TEMPORARY_KEY.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Build a durable identity from a store key.
    pub fn durable(entity: impl Into<String>, key: u64) -> Self {
        Self {
            entity: entity.into(),
            key: ObjectKey::Durable(key),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn key(&self) -> ObjectKey {
        self.key
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self.key, ObjectKey::Temporary(_))
    }

    /// The store key, if this identity is durable.
    pub fn durable_key(&self) -> Option<u64> {
        match self.key {
            ObjectKey::Durable(key) => Some(key),
            ObjectKey::Temporary(_) => None,
        }
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            ObjectKey::Temporary(n) => write!(f, "{}/t{}", self.entity, n),
            ObjectKey::Durable(n) => write!(f, "{}/p{}", self.entity, n),
        }
    }
}

/// Unique identifier for a context.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u64);

impl ContextId {
    pub(crate) fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId({})", self.0)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which kind of execution queue a context is confined to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConcurrencyType {
    /// The stack's primary queue, shared by every main-queue context.
    Main,
    /// A private serial queue owned by the context.
    Private,
}

/// Conflict resolution between a context's pending values and its parent's.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Properties set locally always win over the stored version; properties
    /// not touched locally keep the stored value.
    #[default]
    PropertyObjectTrump,
}

impl MergePolicy {
    /// Apply locally changed properties on top of a base record.
    pub fn merge(&self, base: &mut Properties, local: &Properties) {
        match self {
            MergePolicy::PropertyObjectTrump => {
                for (key, value) in local {
                    base.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Entity name plus property values, as held by contexts and the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub entity: String,
    pub properties: Properties,
}

impl ObjectRecord {
    pub fn new(entity: impl Into<String>, properties: Properties) -> Self {
        Self {
            entity: entity.into(),
            properties,
        }
    }
}

/// A persisted type with a fixed storage entity name.
pub trait Entity {
    /// Entity name as declared in the model.
    const ENTITY_NAME: &'static str;
}

/// Strip any module path from an entity name (`app::models::Widget` -> `Widget`).
pub fn normalize_entity_name(name: &str) -> &str {
    let tail = name.rsplit("::").next().unwrap_or(name);
    tail.rsplit('.').next().unwrap_or(tail)
}
