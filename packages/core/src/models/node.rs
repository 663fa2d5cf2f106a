//! Referral Node Document
//!
//! One document per referral identity. Besides its own payload, every node
//! carries materialized copies of its descendants, split per ancestor
//! distance, so reads never need a join. The copies are maintained by
//! fan-out writes from descendant operations; see the service layer for the
//! consistency contract.
//!
//! # Examples
//!
//! ```rust
//! use reftree_core::models::{Ancestors, Level, ReferralNode};
//!
//! // A root referral
//! let root = ReferralNode::root("alice", "signup-2026");
//! assert!(root.is_root());
//!
//! // A referral two levels deep
//! let mut ancestors = Ancestors::empty();
//! ancestors.set(Level::DIRECT_PARENT, "bob");
//! ancestors.set(Level::new(2).unwrap(), "alice");
//! let node = ReferralNode::with_ancestors("carol", "signup-2026", ancestors);
//! assert!(!node.is_root());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::levels::{Ancestors, ChildEntry, Children};

/// Validation errors for referral node documents.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid ancestor reference: {0}")]
    InvalidAncestor(String),
}

/// A referral node document.
///
/// # Fields
///
/// - `id`: unique identifier; immutable; the primary key
/// - `payload`: opaque caller-controlled value; mutable
/// - `ancestors`: per-level ancestor ids (level 1 = direct parent);
///   write-once at creation, empty for roots
/// - `children`: denormalized descendant records per level; mutated only by
///   fan-out from descendant operations, never by this node's own operations
/// - `created_at` / `modified_at`: timestamps; `modified_at` advances on
///   payload updates
///
/// # Consistency
///
/// For every node X with `ancestors[k] = A`, document A should hold an entry
/// `{id: X.id, payload}` in `children[k]` matching X's current payload. The
/// writes maintaining this span multiple documents without a transaction, so
/// the relation is eventually consistent and can be violated under partial
/// failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralNode {
    /// Unique identifier; the document key.
    pub id: String,

    /// Opaque caller-controlled payload.
    pub payload: String,

    /// Ancestor chain, keyed by level. Absent for roots.
    #[serde(default, skip_serializing_if = "Ancestors::is_empty")]
    pub ancestors: Ancestors,

    /// Denormalized descendant records, keyed by level.
    #[serde(default, skip_serializing_if = "Children::is_empty")]
    pub children: Children,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last payload modification timestamp.
    pub modified_at: DateTime<Utc>,
}

impl ReferralNode {
    /// Create a root referral: no ancestors, no descendants yet.
    pub fn root(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::with_ancestors(id, payload, Ancestors::empty())
    }

    /// Create a referral with a precomputed ancestor chain.
    pub fn with_ancestors(
        id: impl Into<String>,
        payload: impl Into<String>,
        ancestors: Ancestors,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            payload: payload.into(),
            ancestors,
            children: Children::empty(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Validate the document before it is written.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if:
    /// - `id` is empty
    /// - the node references itself as one of its own ancestors
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingField("id".to_string()));
        }

        for (level, ancestor_id) in self.ancestors.iter() {
            if ancestor_id == self.id {
                return Err(ValidationError::InvalidAncestor(format!(
                    "node {} cannot be its own ancestor (level {})",
                    self.id, level
                )));
            }
        }

        Ok(())
    }

    /// `true` when the node has no ancestors.
    pub fn is_root(&self) -> bool {
        self.ancestors.is_empty()
    }

    /// Overwrite the payload, advancing `modified_at`.
    pub fn set_payload(&mut self, payload: impl Into<String>) {
        self.payload = payload.into();
        self.modified_at = Utc::now();
    }

    /// The denormalized record an ancestor keeps for this node.
    pub fn child_entry(&self) -> ChildEntry {
        ChildEntry::new(self.id.clone(), self.payload.clone())
    }
}
