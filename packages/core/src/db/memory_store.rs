//! MemoryStore - In-Memory ReferralStore Backend
//!
//! HashMap-based backend for tests and embedding. Collections of documents
//! live behind one `RwLock`; each trait mutation holds the write lock for
//! the whole mutation, which is exactly the atomic single-document guarantee
//! the contract asks for: two concurrent appends to the same sequence both
//! land, in either order, with no lost update.
//!
//! The pass-through `StoreOptions` are accepted and ignored: there is no
//! session machinery to scope here.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::db::error::{StoreError, StoreResult};
use crate::db::referral_store::{Projection, ReferralStore, StoreOptions, WriteOutcome};
use crate::models::{ChildEntry, Children, Level, ReferralNode};

type Collection = HashMap<String, ReferralNode>;

/// In-memory, HashMap-based referral document store.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .expect("lock poisoned")
            .get(collection)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// `true` when the collection holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Drop every document in every collection.
    pub fn clear(&self) {
        self.collections.write().expect("lock poisoned").clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collections = self.collections.read().expect("lock poisoned");
        let documents: usize = collections.values().map(HashMap::len).sum();
        f.debug_struct("MemoryStore")
            .field("collections", &collections.len())
            .field("documents", &documents)
            .finish()
    }
}

#[async_trait]
impl ReferralStore for MemoryStore {
    async fn find_by_key(
        &self,
        collection: &str,
        id: &str,
        projection: Projection,
        _options: &StoreOptions,
    ) -> StoreResult<Option<ReferralNode>> {
        let collections = self.collections.read().expect("lock poisoned");
        let node = collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned();

        Ok(node.map(|mut node| {
            if let Projection::Ancestors = projection {
                // Narrow projection: the denormalized sequences are the
                // heavy part of a document and the caller asked not to see
                // them.
                node.children = Children::empty();
            }
            node
        }))
    }

    async fn insert(
        &self,
        collection: &str,
        node: ReferralNode,
        _options: &StoreOptions,
    ) -> StoreResult<ReferralNode> {
        let mut collections = self.collections.write().expect("lock poisoned");
        let documents = collections.entry(collection.to_string()).or_default();
        match documents.entry(node.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::conflict(node.id)),
            Entry::Vacant(slot) => {
                slot.insert(node.clone());
                Ok(node)
            }
        }
    }

    async fn push_child(
        &self,
        collection: &str,
        ancestor_id: &str,
        level: Level,
        entry: ChildEntry,
        _options: &StoreOptions,
    ) -> StoreResult<Option<ReferralNode>> {
        let mut collections = self.collections.write().expect("lock poisoned");
        let node = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(ancestor_id));

        Ok(node.map(|node| {
            node.children.push(level, entry);
            node.clone()
        }))
    }

    async fn set_payload(
        &self,
        collection: &str,
        id: &str,
        payload: &str,
        _options: &StoreOptions,
    ) -> StoreResult<Option<ReferralNode>> {
        let mut collections = self.collections.write().expect("lock poisoned");
        let node = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id));

        Ok(node.map(|node| {
            node.set_payload(payload);
            node.clone()
        }))
    }

    async fn set_child_payload(
        &self,
        collection: &str,
        ancestor_id: &str,
        level: Level,
        child_id: &str,
        payload: &str,
        _options: &StoreOptions,
    ) -> StoreResult<WriteOutcome> {
        let mut collections = self.collections.write().expect("lock poisoned");
        let matched = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(ancestor_id))
            .map(|node| node.children.set_payload(level, child_id, payload))
            .unwrap_or(false);

        Ok(if matched {
            WriteOutcome::Matched
        } else {
            WriteOutcome::NoMatch
        })
    }

    async fn remove_child(
        &self,
        collection: &str,
        ancestor_id: &str,
        level: Level,
        child_id: &str,
        _options: &StoreOptions,
    ) -> StoreResult<WriteOutcome> {
        let mut collections = self.collections.write().expect("lock poisoned");
        let matched = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(ancestor_id))
            .map(|node| node.children.remove(level, child_id))
            .unwrap_or(false);

        Ok(if matched {
            WriteOutcome::Matched
        } else {
            WriteOutcome::NoMatch
        })
    }

    async fn delete_by_key(
        &self,
        collection: &str,
        id: &str,
        _options: &StoreOptions,
    ) -> StoreResult<bool> {
        let mut collections = self.collections.write().expect("lock poisoned");
        Ok(collections
            .get_mut(collection)
            .map(|documents| documents.remove(id).is_some())
            .unwrap_or(false))
    }
}
