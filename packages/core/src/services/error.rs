//! Service Layer Error Types
//!
//! Error types for referral operations. Fan-out failures are collected from
//! the whole concurrent batch and reported together; a single failing
//! ancestor write never masks the others.

use thiserror::Error;

use crate::db::StoreError;
use crate::models::{Level, ValidationError};

/// One failed fan-out write: which ancestor, at which level, and why.
#[derive(Debug)]
pub struct FanoutFailure {
    /// Ancestor distance the write targeted.
    pub level: Level,
    /// Key of the ancestor document.
    pub ancestor_id: String,
    /// The store error that sank the write.
    pub source: StoreError,
}

/// Referral operation errors.
#[derive(Error, Debug)]
pub enum ReferralServiceError {
    /// A referral with this id already exists.
    #[error("referral already exists: {id}")]
    Conflict { id: String },

    /// The referenced parent does not exist at insert time.
    #[error("parent referral not found: {parent_id}")]
    ParentNotFound { parent_id: String },

    /// The operation's target referral does not exist.
    #[error("referral not found: {id}")]
    NotFound { id: String },

    /// Document validation failed before any write.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Service was constructed with an unusable configuration.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The owning write succeeded but one or more ancestor writes failed.
    ///
    /// There is no rollback and no retry: the denormalized copies on the
    /// listed ancestors are now stale until a corrective pass repairs them.
    #[error("fan-out incomplete: {} ancestor write(s) failed", .failures.len())]
    PartialFanout { failures: Vec<FanoutFailure> },

    /// Store operation failed; propagated unchanged.
    #[error("store operation failed: {0}")]
    Store(#[source] StoreError),
}

impl ReferralServiceError {
    /// Create a duplicate identity error.
    pub fn conflict(id: impl Into<String>) -> Self {
        Self::Conflict { id: id.into() }
    }

    /// Create a missing parent error.
    pub fn parent_not_found(parent_id: impl Into<String>) -> Self {
        Self::ParentNotFound {
            parent_id: parent_id.into(),
        }
    }

    /// Create a missing target error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

impl From<StoreError> for ReferralServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { id } => Self::Conflict { id },
            other => Self::Store(other),
        }
    }
}
