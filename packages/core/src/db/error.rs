//! Store Error Types
//!
//! Error types for the keyed document store collaborator. The engine treats
//! these as opaque except for `Conflict`, which it maps to its own duplicate
//! identity error.

use thiserror::Error;

/// Errors from keyed document store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A document with this key already exists (unique-key violation).
    #[error("duplicate key: {id}")]
    Conflict { id: String },

    /// Transport or timeout failure from the backend; propagated unchanged,
    /// no local retry policy.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// Document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Create a duplicate-key error.
    pub fn conflict(id: impl Into<String>) -> Self {
        Self::Conflict { id: id.into() }
    }

    /// Create an availability error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
