//! ReferralStore Trait - Store Abstraction Layer
//!
//! This module defines the `ReferralStore` trait that abstracts the keyed
//! document store underneath the referral service. The trait enables
//! multiple backend implementations (in-memory, remote document stores)
//! without changing the fan-out logic in `ReferralService`.
//!
//! # Contract
//!
//! Documents are addressed by `(collection, id)`. Every mutation is an
//! atomic single-document operation: an append, an in-place element set, or
//! an element removal never round-trips the whole sequence through the
//! caller, so two concurrent appends to the same sequence both land.
//!
//! Implementations must be `Send + Sync`; all methods are async so both
//! embedded and network backends fit.
//!
//! # Examples
//!
//! ```rust
//! use reftree_core::db::{MemoryStore, Projection, ReferralStore, StoreOptions};
//! use reftree_core::models::ReferralNode;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store: Arc<dyn ReferralStore> = Arc::new(MemoryStore::new());
//!     let options = StoreOptions::default();
//!
//!     let node = ReferralNode::root("alice", "payload");
//!     store.insert("referrals", node, &options).await?;
//!
//!     let found = store
//!         .find_by_key("referrals", "alice", Projection::Full, &options)
//!         .await?;
//!     assert!(found.is_some());
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;

use crate::db::error::StoreResult;
use crate::models::{ChildEntry, Level, ReferralNode};

/// Pass-through options forwarded verbatim to every store call.
///
/// The engine never interprets these; backends may use them for session or
/// transaction scoping and are free to ignore them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Opaque session/transaction token supplied by the caller.
    pub session: Option<String>,
}

impl StoreOptions {
    /// Options carrying a session token.
    pub fn with_session(session: impl Into<String>) -> Self {
        Self {
            session: Some(session.into()),
        }
    }
}

/// How much of a document a point lookup should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// The whole document.
    Full,
    /// Only the ancestor chain; backends may drop the denormalized
    /// descendant sequences. Used to compute fan-out target sets.
    Ancestors,
}

/// Whether a targeted single-element mutation found its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A matching document and element were found and mutated.
    Matched,
    /// Nothing matched; the store was left untouched.
    NoMatch,
}

impl WriteOutcome {
    pub fn matched(self) -> bool {
        matches!(self, WriteOutcome::Matched)
    }
}

/// Abstraction over the keyed document store holding referral documents.
#[async_trait]
pub trait ReferralStore: Send + Sync {
    /// Point lookup by key.
    ///
    /// Returns `Ok(None)` when the document does not exist (not an error).
    async fn find_by_key(
        &self,
        collection: &str,
        id: &str,
        projection: Projection,
        options: &StoreOptions,
    ) -> StoreResult<Option<ReferralNode>>;

    /// Insert a new document.
    ///
    /// # Errors
    ///
    /// `StoreError::Conflict` when a document with the same id already
    /// exists; the store's uniqueness constraint is authoritative.
    async fn insert(
        &self,
        collection: &str,
        node: ReferralNode,
        options: &StoreOptions,
    ) -> StoreResult<ReferralNode>;

    /// Atomically append `entry` to `children[level]` of the document with
    /// key `ancestor_id`, returning the post-update document.
    ///
    /// Returns `Ok(None)` when no document matches (nothing is written).
    async fn push_child(
        &self,
        collection: &str,
        ancestor_id: &str,
        level: Level,
        entry: ChildEntry,
        options: &StoreOptions,
    ) -> StoreResult<Option<ReferralNode>>;

    /// Atomically overwrite the payload of the document with key `id`,
    /// returning the post-update document.
    ///
    /// Returns `Ok(None)` when no document matches.
    async fn set_payload(
        &self,
        collection: &str,
        id: &str,
        payload: &str,
        options: &StoreOptions,
    ) -> StoreResult<Option<ReferralNode>>;

    /// Atomically locate the entry for `child_id` inside `children[level]`
    /// of document `ancestor_id` and overwrite its payload in place.
    ///
    /// Reports `NoMatch` when the document or the entry is absent.
    async fn set_child_payload(
        &self,
        collection: &str,
        ancestor_id: &str,
        level: Level,
        child_id: &str,
        payload: &str,
        options: &StoreOptions,
    ) -> StoreResult<WriteOutcome>;

    /// Atomically remove exactly the entry for `child_id` from
    /// `children[level]` of document `ancestor_id`.
    ///
    /// Sibling entries at the same level are never disturbed. Reports
    /// `NoMatch` when the document or the entry is absent.
    async fn remove_child(
        &self,
        collection: &str,
        ancestor_id: &str,
        level: Level,
        child_id: &str,
        options: &StoreOptions,
    ) -> StoreResult<WriteOutcome>;

    /// Delete the document with key `id`.
    ///
    /// Returns whether the document existed (idempotent delete).
    async fn delete_by_key(
        &self,
        collection: &str,
        id: &str,
        options: &StoreOptions,
    ) -> StoreResult<bool>;
}
