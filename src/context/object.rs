//! Snapshot of one object as seen by a context.

use super::Context;
use crate::error::{Result, StackError};
use crate::types::{ObjectId, ObjectRecord, Properties, Value};
use std::fmt;

/// An object's identity and values, bound to the context it was read from.
#[derive(Clone)]
pub struct ManagedObject {
    id: ObjectId,
    record: ObjectRecord,
    context: Option<Context>,
}

impl ManagedObject {
    pub(crate) fn new(id: ObjectId, record: ObjectRecord, context: Option<Context>) -> Self {
        Self {
            id,
            record,
            context,
        }
    }

    /// Current identity, following any upgrade its context has performed.
    pub fn object_id(&self) -> ObjectId {
        match &self.context {
            Some(context) => context.resolve_id(&self.id),
            None => self.id.clone(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.record.entity
    }

    pub fn properties(&self) -> &Properties {
        &self.record.properties
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.record.properties.get(key)
    }

    /// The context this object belongs to, if any.
    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    /// Durable identity of this object, upgrading a temporary one through
    /// the owning context.
    pub fn permanent_id(&self) -> Result<ObjectId> {
        let id = self.object_id();
        if !id.is_temporary() {
            return Ok(id);
        }

        let context = self.context.as_ref().ok_or(StackError::NoPersistentStore)?;
        context
            .obtain_permanent_ids(std::slice::from_ref(&id))?
            .into_iter()
            .next()
            .ok_or(StackError::ObjectNotFound(id))
    }
}

impl fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObject")
            .field("id", &self.object_id())
            .field("properties", &self.record.properties)
            .finish()
    }
}
