//! Referral Service - Core Tree Operations
//!
//! This module is the engine behind the denormalized referral tree. It owns
//! the four operations (create, payload update, remove, read) and the
//! fan-out protocol that keeps each node's denormalized copies on its
//! ancestors current.
//!
//! # Fan-out protocol
//!
//! Every mutation has one "owning" write (to the document whose own fields
//! change) and up to L-1 "fan-out" writes (to ancestor documents holding
//! denormalized copies). There is no multi-document transaction:
//!
//! 1. On create, the level-1 append to the parent happens first and returns
//!    the parent's ancestor chain, which seeds the new node's own chain.
//!    The owning insert follows, then the remaining ancestors are written
//!    concurrently.
//! 2. On payload update and removal, the node's ancestor set is read first
//!    (narrow projection), then the owning write and all fan-out writes are
//!    dispatched concurrently and jointly awaited.
//!
//! Fan-out writes are never retried or rolled back. A target whose matching
//! document/entry is gone is a logged `Missing` outcome; a target whose
//! write errored is collected into
//! [`ReferralServiceError::PartialFanout`](crate::services::ReferralServiceError)
//! together with every other failed target.
//!
//! # Examples
//!
//! ```rust
//! use reftree_core::db::{MemoryStore, StoreOptions};
//! use reftree_core::services::{ReferralConfig, ReferralService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = ReferralService::new(
//!         Arc::new(MemoryStore::new()),
//!         ReferralConfig::default(),
//!     )?;
//!     let options = StoreOptions::default();
//!
//!     service.create_referral("alice", "root-payload", None, &options).await?;
//!     service.create_referral("bob", "child-payload", Some("alice"), &options).await?;
//!
//!     let bob = service.get_referral("bob", &options).await?.unwrap();
//!     assert!(!bob.is_root());
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::db::{Projection, ReferralStore, StoreOptions, StoreResult, WriteOutcome};
use crate::models::{Ancestors, ChildEntry, Level, ReferralNode};
use crate::services::error::{FanoutFailure, ReferralServiceError};

/// Configuration for a [`ReferralService`].
///
/// # Examples
///
/// ```rust
/// use reftree_core::services::ReferralConfig;
///
/// let config = ReferralConfig::default(); // 3 levels, "referrals"
/// let deep = ReferralConfig::default().with_levels(5).with_collection("partners");
/// assert_eq!(deep.levels, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralConfig {
    /// Maximum ancestor distance tracked per node. A node never records an
    /// ancestor, and never receives a fan-out write, past this distance.
    pub levels: u8,
    /// Collection/namespace the referral documents live in.
    pub collection: String,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            levels: 3,
            collection: "referrals".to_string(),
        }
    }
}

impl ReferralConfig {
    /// Set the maximum tracked ancestor distance.
    pub fn with_levels(mut self, levels: u8) -> Self {
        self.levels = levels;
        self
    }

    /// Set the collection name.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }
}

/// Outcome of one fan-out write that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutStatus {
    /// The matching document and entry were found and mutated.
    Applied,
    /// No matching document/entry existed; the target was skipped. The tree
    /// was already structurally inconsistent for this pair, typically from
    /// an earlier partial failure or a racing removal.
    Missing,
}

/// Per-target record of a fan-out batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutWrite {
    pub level: Level,
    pub ancestor_id: String,
    pub status: FanoutStatus,
}

/// Result of a payload update: the post-update document plus the outcome of
/// every ancestor write.
#[derive(Debug)]
pub struct UpdateReport {
    /// The owning document after the update.
    pub node: ReferralNode,
    /// Per-ancestor outcomes.
    pub fanout: Vec<FanoutWrite>,
}

/// Result of a removal: whether the owning document existed at delete time
/// plus the outcome of every ancestor cleanup write.
#[derive(Debug)]
pub struct RemoveReport {
    /// `false` when a concurrent removal got there first.
    pub existed: bool,
    /// Per-ancestor outcomes.
    pub fanout: Vec<FanoutWrite>,
}

/// The referral tree engine.
///
/// Holds no tree state of its own: every operation re-derives the ancestor
/// set it needs from the stored documents, and all mutation goes through the
/// store's atomic single-document operations.
pub struct ReferralService {
    store: Arc<dyn ReferralStore>,
    config: ReferralConfig,
}

impl std::fmt::Debug for ReferralService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferralService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReferralService {
    /// Create a service over the given store.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when `config.levels` is 0.
    pub fn new(
        store: Arc<dyn ReferralStore>,
        config: ReferralConfig,
    ) -> Result<Self, ReferralServiceError> {
        if config.levels == 0 {
            return Err(ReferralServiceError::configuration(
                "level count must be at least 1",
            ));
        }
        Ok(Self { store, config })
    }

    /// The active configuration.
    pub fn config(&self) -> &ReferralConfig {
        &self.config
    }

    /// Create a referral, optionally under a parent.
    ///
    /// Without a parent this is a single owning insert. With a parent:
    ///
    /// 1. Atomically append the new `{id, payload}` record to the parent's
    ///    level-1 sequence, reading the parent's ancestor chain back from
    ///    the same write.
    /// 2. Derive the new node's chain: level 1 is the parent; the parent's
    ///    level-(k-1) ancestor becomes the new node's level-k ancestor, up
    ///    to the configured maximum.
    /// 3. Insert the new node's own document.
    /// 4. Concurrently append the record to every remaining ancestor at its
    ///    level (level 1 already holds it from step 1).
    ///
    /// # Errors
    ///
    /// - `Validation` for an empty id, before any write
    /// - `ParentNotFound` when `parent` names no existing document
    /// - `Conflict` when `id` already exists; note the parent's level-1
    ///   append from step 1 has already happened at that point and is not
    ///   rolled back
    /// - `PartialFanout` when step 4 writes fail; the node itself was
    ///   created
    pub async fn create_referral(
        &self,
        id: &str,
        payload: &str,
        parent: Option<&str>,
        options: &StoreOptions,
    ) -> Result<ReferralNode, ReferralServiceError> {
        let parent_id = match parent {
            Some(parent_id) => parent_id,
            None => {
                let node = ReferralNode::root(id, payload);
                node.validate()?;
                let node = self
                    .store
                    .insert(&self.config.collection, node, options)
                    .await?;
                return Ok(node);
            }
        };

        // Reject bad input before touching the parent document.
        ReferralNode::root(id, payload).validate()?;

        // Owning write on the parent: record the child at level 1 and read
        // the parent's ancestor chain back in the same round trip.
        let parent_doc = self
            .store
            .push_child(
                &self.config.collection,
                parent_id,
                Level::DIRECT_PARENT,
                ChildEntry::new(id, payload),
                options,
            )
            .await?
            .ok_or_else(|| ReferralServiceError::parent_not_found(parent_id))?;

        // Shift the parent's chain down one level relative to the new node;
        // anything past the configured maximum is dropped.
        let mut ancestors = Ancestors::empty();
        ancestors.set(Level::DIRECT_PARENT, parent_id);
        for level in (2..=self.config.levels).filter_map(Level::new) {
            if let Some(above) = level
                .shallower()
                .and_then(|prev| parent_doc.ancestors.at(prev))
            {
                ancestors.set(level, above);
            }
        }

        let node = ReferralNode::with_ancestors(id, payload, ancestors);
        node.validate()?;
        let node = self
            .store
            .insert(&self.config.collection, node, options)
            .await?;

        // Level 1 already holds the record; the deeper ancestors get their
        // copies concurrently.
        let targets = fanout_targets(&node.ancestors, true);
        debug!(
            "fanning out insert of {} to {} ancestor(s)",
            node.id,
            targets.len()
        );

        let results = join_all(targets.iter().map(|(level, ancestor_id)| {
            let entry = node.child_entry();
            async move {
                let result = self
                    .store
                    .push_child(
                        &self.config.collection,
                        ancestor_id,
                        *level,
                        entry,
                        options,
                    )
                    .await;
                (*level, ancestor_id.as_str(), result)
            }
        }))
        .await;

        let mut failures = Vec::new();
        for (level, ancestor_id, result) in results {
            match result {
                Ok(Some(_)) => {}
                Ok(None) => warn!(
                    "ancestor {} (level {}) missing during insert fan-out of {}",
                    ancestor_id, level, node.id
                ),
                Err(source) => failures.push(FanoutFailure {
                    level,
                    ancestor_id: ancestor_id.to_string(),
                    source,
                }),
            }
        }
        if !failures.is_empty() {
            return Err(ReferralServiceError::PartialFanout { failures });
        }

        Ok(node)
    }

    /// Overwrite a referral's payload and propagate the new value into every
    /// ancestor's denormalized copy.
    ///
    /// The ancestor set is read first (narrow projection); the owning write
    /// and all ancestor writes are then dispatched concurrently and awaited
    /// as one batch.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the referral does not exist, before any write, or
    ///   when a concurrent removal deleted it mid-batch
    /// - `PartialFanout` when ancestor writes fail; the owning update is
    ///   not rolled back
    pub async fn update_referral_payload(
        &self,
        id: &str,
        payload: &str,
        options: &StoreOptions,
    ) -> Result<UpdateReport, ReferralServiceError> {
        let node = self
            .store
            .find_by_key(&self.config.collection, id, Projection::Ancestors, options)
            .await?
            .ok_or_else(|| ReferralServiceError::not_found(id))?;

        let targets = fanout_targets(&node.ancestors, false);
        debug!(
            "propagating payload of {} to {} ancestor(s)",
            id,
            targets.len()
        );

        let own = self
            .store
            .set_payload(&self.config.collection, id, payload, options);
        let batch = join_all(targets.iter().map(|(level, ancestor_id)| async move {
            let result = self
                .store
                .set_child_payload(
                    &self.config.collection,
                    ancestor_id,
                    *level,
                    id,
                    payload,
                    options,
                )
                .await;
            (*level, ancestor_id.as_str(), result)
        }));
        let (primary, outcomes) = tokio::join!(own, batch);

        let updated = primary?.ok_or_else(|| ReferralServiceError::not_found(id))?;
        let (fanout, failures) = collect_outcomes(outcomes, id, "payload update");
        if !failures.is_empty() {
            return Err(ReferralServiceError::PartialFanout { failures });
        }

        Ok(UpdateReport {
            node: updated,
            fanout,
        })
    }

    /// Remove a referral and its denormalized copies from every ancestor.
    ///
    /// Each ancestor cleanup removes exactly the matching entry at its
    /// level; sibling entries are untouched. Deeper descendants of the
    /// removed node are not reparented or cleaned up; their own ancestor
    /// chains keep pointing at the removed id.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the referral does not exist, before any write
    /// - `PartialFanout` when ancestor cleanups fail; the owning delete is
    ///   not rolled back
    pub async fn remove_referral(
        &self,
        id: &str,
        options: &StoreOptions,
    ) -> Result<RemoveReport, ReferralServiceError> {
        let node = self
            .store
            .find_by_key(&self.config.collection, id, Projection::Ancestors, options)
            .await?
            .ok_or_else(|| ReferralServiceError::not_found(id))?;

        let targets = fanout_targets(&node.ancestors, false);
        debug!("removing {} from {} ancestor(s)", id, targets.len());

        let own = self.store.delete_by_key(&self.config.collection, id, options);
        let batch = join_all(targets.iter().map(|(level, ancestor_id)| async move {
            let result = self
                .store
                .remove_child(&self.config.collection, ancestor_id, *level, id, options)
                .await;
            (*level, ancestor_id.as_str(), result)
        }));
        let (primary, outcomes) = tokio::join!(own, batch);

        let existed = primary?;
        let (fanout, failures) = collect_outcomes(outcomes, id, "removal");
        if !failures.is_empty() {
            return Err(ReferralServiceError::PartialFanout { failures });
        }

        Ok(RemoveReport { existed, fanout })
    }

    /// Fetch a referral document. No fan-out; absent is `Ok(None)`.
    pub async fn get_referral(
        &self,
        id: &str,
        options: &StoreOptions,
    ) -> Result<Option<ReferralNode>, ReferralServiceError> {
        let node = self
            .store
            .find_by_key(&self.config.collection, id, Projection::Full, options)
            .await?;
        Ok(node)
    }
}

/// Collect the `(level, ancestor)` pairs an operation must touch.
fn fanout_targets(ancestors: &Ancestors, skip_direct_parent: bool) -> Vec<(Level, String)> {
    ancestors
        .iter()
        .filter(|(level, _)| !(skip_direct_parent && *level == Level::DIRECT_PARENT))
        .map(|(level, id)| (level, id.to_string()))
        .collect()
}

/// Split a batch of targeted-write results into per-target outcomes and
/// collected failures.
fn collect_outcomes(
    outcomes: Vec<(Level, &str, StoreResult<WriteOutcome>)>,
    id: &str,
    action: &str,
) -> (Vec<FanoutWrite>, Vec<FanoutFailure>) {
    let mut fanout = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (level, ancestor_id, result) in outcomes {
        match result {
            Ok(outcome) if outcome.matched() => fanout.push(FanoutWrite {
                level,
                ancestor_id: ancestor_id.to_string(),
                status: FanoutStatus::Applied,
            }),
            Ok(_) => {
                warn!(
                    "no entry for {} on ancestor {} (level {}) during {}",
                    id, ancestor_id, level, action
                );
                fanout.push(FanoutWrite {
                    level,
                    ancestor_id: ancestor_id.to_string(),
                    status: FanoutStatus::Missing,
                });
            }
            Err(source) => failures.push(FanoutFailure {
                level,
                ancestor_id: ancestor_id.to_string(),
                source,
            }),
        }
    }
    (fanout, failures)
}
