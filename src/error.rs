//! Error types for the context stack.

use crate::types::ObjectId;
use thiserror::Error;

/// Main error type for stack operations.
#[derive(Debug, Error)]
pub enum StackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Failed to open persistent store: {0}")]
    StoreOpen(String),

    #[error("Validation failed for {entity}: {message}")]
    Validation { entity: String, message: String },

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("No persistent store reachable from context")]
    NoPersistentStore,

    #[error("Execution queue closed")]
    QueueClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for StackError {
    fn from(e: serde_json::Error) -> Self {
        StackError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StackError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StackError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StackError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StackError::Deserialization(e.to_string())
    }
}

/// Result type for stack operations.
pub type Result<T> = std::result::Result<T, StackError>;
