//! Service-level tests for the referral tree engine: ancestor derivation,
//! fan-out symmetry, propagation, removal, concurrency, and partial-failure
//! reporting. Store doubles below inject faults the in-memory backend never
//! produces on its own.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::db::{
    MemoryStore, Projection, ReferralStore, StoreError, StoreOptions, StoreResult, WriteOutcome,
};
use crate::models::{ChildEntry, Level, ReferralNode};
use crate::services::{FanoutStatus, ReferralConfig, ReferralService, ReferralServiceError};

fn level(distance: u8) -> Level {
    Level::new(distance).unwrap()
}

fn options() -> StoreOptions {
    StoreOptions::default()
}

fn service_over(store: Arc<dyn ReferralStore>) -> ReferralService {
    ReferralService::new(store, ReferralConfig::default()).unwrap()
}

fn default_service() -> (ReferralService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (service_over(store.clone()), store)
}

/// Create the chain r -> u1 -> u2 -> u3 used by most tests.
async fn create_chain(service: &ReferralService) {
    service.create_referral("r", "pr", None, &options()).await.unwrap();
    service
        .create_referral("u1", "p1", Some("r"), &options())
        .await
        .unwrap();
    service
        .create_referral("u2", "p2", Some("u1"), &options())
        .await
        .unwrap();
    service
        .create_referral("u3", "p3", Some("u2"), &options())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_create_root_referral() {
    let (service, _store) = default_service();

    let created = service
        .create_referral("alice", "root-payload", None, &options())
        .await
        .unwrap();
    assert_eq!(created.id, "alice");
    assert!(created.is_root());
    assert!(created.children.is_empty());

    let read = service.get_referral("alice", &options()).await.unwrap().unwrap();
    assert_eq!(read.payload, "root-payload");
    assert!(read.ancestors.is_empty());
}

#[tokio::test]
async fn test_level_derivation_along_chain() {
    let (service, _store) = default_service();
    create_chain(&service).await;

    let u3 = service.get_referral("u3", &options()).await.unwrap().unwrap();
    assert_eq!(u3.ancestors.at(level(1)), Some("u2"));
    assert_eq!(u3.ancestors.at(level(2)), Some("u1"));
    assert_eq!(u3.ancestors.at(level(3)), Some("r"));
    assert_eq!(u3.ancestors.len(), 3);
}

#[tokio::test]
async fn test_level_bound_on_deep_chains() {
    let (service, _store) = default_service();
    create_chain(&service).await;

    // Fifth generation: the root falls off the end of the chain.
    let u4 = service
        .create_referral("u4", "p4", Some("u3"), &options())
        .await
        .unwrap();
    assert_eq!(u4.ancestors.at(level(1)), Some("u3"));
    assert_eq!(u4.ancestors.at(level(2)), Some("u2"));
    assert_eq!(u4.ancestors.at(level(3)), Some("u1"));
    assert!(u4.ancestors.iter().all(|(l, _)| l.get() <= 3));

    // And the root never receives a fan-out write for it.
    let root = service.get_referral("r", &options()).await.unwrap().unwrap();
    for distance in 1..=3 {
        assert!(root
            .children
            .at(level(distance))
            .iter()
            .all(|entry| entry.id != "u4"));
    }
}

#[tokio::test]
async fn test_insert_fanout_symmetry() {
    let (service, _store) = default_service();
    create_chain(&service).await;

    let r = service.get_referral("r", &options()).await.unwrap().unwrap();
    let u1 = service.get_referral("u1", &options()).await.unwrap().unwrap();
    let u2 = service.get_referral("u2", &options()).await.unwrap().unwrap();

    assert!(r.children.at(level(3)).iter().any(|e| e.id == "u3"));
    assert!(u1.children.at(level(2)).iter().any(|e| e.id == "u3"));
    assert!(u2.children.at(level(1)).iter().any(|e| e.id == "u3"));

    // Intermediate generations as well
    assert!(r.children.at(level(1)).iter().any(|e| e.id == "u1"));
    assert!(r.children.at(level(2)).iter().any(|e| e.id == "u2"));
}

#[tokio::test]
async fn test_update_payload_propagates_to_all_ancestors() {
    let (service, _store) = default_service();
    create_chain(&service).await;

    let report = service
        .update_referral_payload("u3", "x", &options())
        .await
        .unwrap();
    assert_eq!(report.node.payload, "x");
    assert_eq!(report.fanout.len(), 3);
    assert!(report
        .fanout
        .iter()
        .all(|write| write.status == FanoutStatus::Applied));

    let read = service.get_referral("u3", &options()).await.unwrap().unwrap();
    assert_eq!(read.payload, "x");

    for (ancestor, distance) in [("u2", 1), ("u1", 2), ("r", 3)] {
        let doc = service.get_referral(ancestor, &options()).await.unwrap().unwrap();
        let entry = doc
            .children
            .at(level(distance))
            .iter()
            .find(|e| e.id == "u3")
            .unwrap();
        assert_eq!(entry.payload, "x");
    }
}

#[tokio::test]
async fn test_update_advances_modified_at_only() {
    let (service, _store) = default_service();
    let created = service
        .create_referral("alice", "v1", None, &options())
        .await
        .unwrap();

    let report = service
        .update_referral_payload("alice", "v2", &options())
        .await
        .unwrap();
    assert_eq!(report.node.created_at, created.created_at);
    assert!(report.node.modified_at >= created.modified_at);
}

#[tokio::test]
async fn test_remove_referral_spares_siblings() {
    let (service, _store) = default_service();
    create_chain(&service).await;

    // A sibling of u3 under u2: present at the same levels on the same
    // ancestors.
    service
        .create_referral("u3b", "p3b", Some("u2"), &options())
        .await
        .unwrap();

    let report = service.remove_referral("u3", &options()).await.unwrap();
    assert!(report.existed);
    assert_eq!(report.fanout.len(), 3);
    assert!(report
        .fanout
        .iter()
        .all(|write| write.status == FanoutStatus::Applied));

    assert!(service.get_referral("u3", &options()).await.unwrap().is_none());

    for (ancestor, distance) in [("u2", 1), ("u1", 2), ("r", 3)] {
        let doc = service.get_referral(ancestor, &options()).await.unwrap().unwrap();
        let entries = doc.children.at(level(distance));
        assert!(entries.iter().all(|e| e.id != "u3"));
        // The sibling's denormalized entry survives at the same level.
        assert!(entries.iter().any(|e| e.id == "u3b"));
    }

    // The removed node's own ancestors are intact.
    assert!(service.get_referral("u1", &options()).await.unwrap().is_some());
    assert!(service.get_referral("u2", &options()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_concurrent_sibling_inserts_both_land() {
    let (service, _store) = default_service();
    let service = Arc::new(service);
    service.create_referral("r", "pr", None, &options()).await.unwrap();

    let mut handles = Vec::new();
    for child in ["left", "right"] {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .create_referral(child, "p", Some("r"), &StoreOptions::default())
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let root = service.get_referral("r", &options()).await.unwrap().unwrap();
    let mut ids: Vec<&str> = root
        .children
        .at(level(1))
        .iter()
        .map(|e| e.id.as_str())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["left", "right"]);
}

#[tokio::test]
async fn test_duplicate_id_is_conflict() {
    let (service, _store) = default_service();
    service
        .create_referral("alice", "first", None, &options())
        .await
        .unwrap();

    let err = service
        .create_referral("alice", "second", None, &options())
        .await
        .unwrap_err();
    assert!(matches!(err, ReferralServiceError::Conflict { .. }));

    let read = service.get_referral("alice", &options()).await.unwrap().unwrap();
    assert_eq!(read.payload, "first");
}

#[tokio::test]
async fn test_missing_parent_is_explicit_error() {
    let (service, store) = default_service();

    let err = service
        .create_referral("child", "p", Some("ghost"), &options())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReferralServiceError::ParentNotFound { ref parent_id } if parent_id == "ghost"
    ));
    assert!(store.is_empty("referrals"));
}

#[tokio::test]
async fn test_empty_id_rejected_before_any_write() {
    let (service, store) = default_service();
    service.create_referral("r", "pr", None, &options()).await.unwrap();

    let err = service
        .create_referral("", "p", Some("r"), &options())
        .await
        .unwrap_err();
    assert!(matches!(err, ReferralServiceError::Validation(_)));

    // The parent was not touched.
    let root = service.get_referral("r", &options()).await.unwrap().unwrap();
    assert!(root.children.is_empty());
}

#[tokio::test]
async fn test_update_missing_referral_fails_fast() {
    let (service, _store) = default_service();
    let err = service
        .update_referral_payload("ghost", "x", &options())
        .await
        .unwrap_err();
    assert!(matches!(err, ReferralServiceError::NotFound { .. }));
}

#[tokio::test]
async fn test_remove_missing_referral_fails_fast() {
    let (service, _store) = default_service();
    let err = service.remove_referral("ghost", &options()).await.unwrap_err();
    assert!(matches!(err, ReferralServiceError::NotFound { .. }));
}

#[tokio::test]
async fn test_get_missing_referral_is_none() {
    let (service, _store) = default_service();
    assert!(service.get_referral("ghost", &options()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_skips_structurally_inconsistent_ancestor() {
    let (service, store) = default_service();
    create_chain(&service).await;

    // Induce the inconsistency: drop u3's denormalized entry from u1.
    let outcome = store
        .remove_child("referrals", "u1", level(2), "u3", &options())
        .await
        .unwrap();
    assert!(outcome.matched());

    let report = service
        .update_referral_payload("u3", "x", &options())
        .await
        .unwrap();

    let missing: Vec<&str> = report
        .fanout
        .iter()
        .filter(|write| write.status == FanoutStatus::Missing)
        .map(|write| write.ancestor_id.as_str())
        .collect();
    assert_eq!(missing, vec!["u1"]);

    // Everything else still propagated.
    let u2 = service.get_referral("u2", &options()).await.unwrap().unwrap();
    assert_eq!(
        u2.children.at(level(1)).iter().find(|e| e.id == "u3").unwrap().payload,
        "x"
    );
}

#[tokio::test]
async fn test_custom_collection_and_levels() {
    let store = Arc::new(MemoryStore::new());
    let config = ReferralConfig::default()
        .with_levels(2)
        .with_collection("partners");
    let service = ReferralService::new(store.clone(), config).unwrap();

    service.create_referral("r", "pr", None, &options()).await.unwrap();
    service
        .create_referral("a", "pa", Some("r"), &options())
        .await
        .unwrap();
    let b = service
        .create_referral("b", "pb", Some("a"), &options())
        .await
        .unwrap();

    // Two levels tracked, never three.
    assert_eq!(b.ancestors.at(level(1)), Some("a"));
    assert_eq!(b.ancestors.at(level(2)), Some("r"));
    assert_eq!(b.ancestors.len(), 2);

    assert_eq!(store.len("partners"), 3);
    assert_eq!(store.len("referrals"), 0);
}

#[tokio::test]
async fn test_zero_levels_rejected() {
    let store: Arc<dyn ReferralStore> = Arc::new(MemoryStore::new());
    let err = ReferralService::new(store, ReferralConfig::default().with_levels(0)).unwrap_err();
    assert!(matches!(err, ReferralServiceError::Configuration(_)));
}

//
// Store doubles for fault injection and pass-through checks
//

/// Delegates to a `MemoryStore`, but child-record writes targeting
/// `fail_ancestor` fail with an availability error.
struct FlakyStore {
    inner: MemoryStore,
    fail_ancestor: String,
}

impl FlakyStore {
    fn failing_for(ancestor: &str) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_ancestor: ancestor.to_string(),
        }
    }

    fn check(&self, ancestor_id: &str) -> StoreResult<()> {
        if ancestor_id == self.fail_ancestor {
            Err(StoreError::unavailable("injected fault"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ReferralStore for FlakyStore {
    async fn find_by_key(
        &self,
        collection: &str,
        id: &str,
        projection: Projection,
        options: &StoreOptions,
    ) -> StoreResult<Option<ReferralNode>> {
        self.inner.find_by_key(collection, id, projection, options).await
    }

    async fn insert(
        &self,
        collection: &str,
        node: ReferralNode,
        options: &StoreOptions,
    ) -> StoreResult<ReferralNode> {
        self.inner.insert(collection, node, options).await
    }

    async fn push_child(
        &self,
        collection: &str,
        ancestor_id: &str,
        level: Level,
        entry: ChildEntry,
        options: &StoreOptions,
    ) -> StoreResult<Option<ReferralNode>> {
        self.check(ancestor_id)?;
        self.inner
            .push_child(collection, ancestor_id, level, entry, options)
            .await
    }

    async fn set_payload(
        &self,
        collection: &str,
        id: &str,
        payload: &str,
        options: &StoreOptions,
    ) -> StoreResult<Option<ReferralNode>> {
        self.inner.set_payload(collection, id, payload, options).await
    }

    async fn set_child_payload(
        &self,
        collection: &str,
        ancestor_id: &str,
        level: Level,
        child_id: &str,
        payload: &str,
        options: &StoreOptions,
    ) -> StoreResult<WriteOutcome> {
        self.check(ancestor_id)?;
        self.inner
            .set_child_payload(collection, ancestor_id, level, child_id, payload, options)
            .await
    }

    async fn remove_child(
        &self,
        collection: &str,
        ancestor_id: &str,
        level: Level,
        child_id: &str,
        options: &StoreOptions,
    ) -> StoreResult<WriteOutcome> {
        self.check(ancestor_id)?;
        self.inner
            .remove_child(collection, ancestor_id, level, child_id, options)
            .await
    }

    async fn delete_by_key(
        &self,
        collection: &str,
        id: &str,
        options: &StoreOptions,
    ) -> StoreResult<bool> {
        self.inner.delete_by_key(collection, id, options).await
    }
}

#[tokio::test]
async fn test_insert_partial_fanout_is_surfaced() {
    // Level-2 writes to "r" fail; the level-1 owning path ("u1") stays
    // healthy.
    let store = Arc::new(FlakyStore::failing_for("r"));
    let service = service_over(store.clone());

    // Direct inserts into the inner store so the chain exists without
    // triggering the fault.
    store
        .inner
        .insert("referrals", ReferralNode::root("r", "pr"), &options())
        .await
        .unwrap();
    service
        .create_referral("u1", "p1", Some("r"), &options())
        .await
        .unwrap_err(); // r is the level-1 target here, so this one fails outright

    // Rebuild: a parent whose own ancestor is the failing node.
    let mut ancestors = crate::models::Ancestors::empty();
    ancestors.set(level(1), "r");
    store
        .inner
        .insert(
            "referrals",
            ReferralNode::with_ancestors("u1", "p1", ancestors),
            &options(),
        )
        .await
        .unwrap();

    let err = service
        .create_referral("u2", "p2", Some("u1"), &options())
        .await
        .unwrap_err();
    match err {
        ReferralServiceError::PartialFanout { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].ancestor_id, "r");
            assert_eq!(failures[0].level, level(2));
            assert!(matches!(failures[0].source, StoreError::Unavailable { .. }));
        }
        other => panic!("expected PartialFanout, got {:?}", other),
    }

    // The owning insert went through: u2 exists with its full chain.
    let u2 = service.get_referral("u2", &options()).await.unwrap().unwrap();
    assert_eq!(u2.ancestors.at(level(1)), Some("u1"));
    assert_eq!(u2.ancestors.at(level(2)), Some("r"));
}

#[tokio::test]
async fn test_update_partial_fanout_keeps_primary_effect() {
    let store = Arc::new(FlakyStore::failing_for("u1"));
    let service = service_over(store.clone());

    // Seed r -> u1 -> u2 directly, bypassing the injected fault.
    store
        .inner
        .insert("referrals", ReferralNode::root("r", "pr"), &options())
        .await
        .unwrap();
    let mut a1 = crate::models::Ancestors::empty();
    a1.set(level(1), "r");
    store
        .inner
        .insert(
            "referrals",
            ReferralNode::with_ancestors("u1", "p1", a1),
            &options(),
        )
        .await
        .unwrap();
    let mut a2 = crate::models::Ancestors::empty();
    a2.set(level(1), "u1");
    a2.set(level(2), "r");
    store
        .inner
        .insert(
            "referrals",
            ReferralNode::with_ancestors("u2", "p2", a2),
            &options(),
        )
        .await
        .unwrap();
    store
        .inner
        .push_child("referrals", "u1", level(1), ChildEntry::new("u2", "p2"), &options())
        .await
        .unwrap();
    store
        .inner
        .push_child("referrals", "r", level(2), ChildEntry::new("u2", "p2"), &options())
        .await
        .unwrap();

    let err = service
        .update_referral_payload("u2", "fresh", &options())
        .await
        .unwrap_err();
    match err {
        ReferralServiceError::PartialFanout { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].ancestor_id, "u1");
        }
        other => panic!("expected PartialFanout, got {:?}", other),
    }

    // The owning write is not rolled back; the healthy ancestor got the new
    // value; the failed one is left stale.
    let u2 = service.get_referral("u2", &options()).await.unwrap().unwrap();
    assert_eq!(u2.payload, "fresh");
    let r = service.get_referral("r", &options()).await.unwrap().unwrap();
    assert_eq!(
        r.children.at(level(2)).iter().find(|e| e.id == "u2").unwrap().payload,
        "fresh"
    );
    let u1 = service.get_referral("u1", &options()).await.unwrap().unwrap();
    assert_eq!(
        u1.children.at(level(1)).iter().find(|e| e.id == "u2").unwrap().payload,
        "p2"
    );
}

/// Delegates to a `MemoryStore` and records the options of every call.
struct RecordingStore {
    inner: MemoryStore,
    seen: Mutex<Vec<StoreOptions>>,
}

impl RecordingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, options: &StoreOptions) {
        self.seen.lock().unwrap().push(options.clone());
    }
}

#[async_trait]
impl ReferralStore for RecordingStore {
    async fn find_by_key(
        &self,
        collection: &str,
        id: &str,
        projection: Projection,
        options: &StoreOptions,
    ) -> StoreResult<Option<ReferralNode>> {
        self.record(options);
        self.inner.find_by_key(collection, id, projection, options).await
    }

    async fn insert(
        &self,
        collection: &str,
        node: ReferralNode,
        options: &StoreOptions,
    ) -> StoreResult<ReferralNode> {
        self.record(options);
        self.inner.insert(collection, node, options).await
    }

    async fn push_child(
        &self,
        collection: &str,
        ancestor_id: &str,
        level: Level,
        entry: ChildEntry,
        options: &StoreOptions,
    ) -> StoreResult<Option<ReferralNode>> {
        self.record(options);
        self.inner
            .push_child(collection, ancestor_id, level, entry, options)
            .await
    }

    async fn set_payload(
        &self,
        collection: &str,
        id: &str,
        payload: &str,
        options: &StoreOptions,
    ) -> StoreResult<Option<ReferralNode>> {
        self.record(options);
        self.inner.set_payload(collection, id, payload, options).await
    }

    async fn set_child_payload(
        &self,
        collection: &str,
        ancestor_id: &str,
        level: Level,
        child_id: &str,
        payload: &str,
        options: &StoreOptions,
    ) -> StoreResult<WriteOutcome> {
        self.record(options);
        self.inner
            .set_child_payload(collection, ancestor_id, level, child_id, payload, options)
            .await
    }

    async fn remove_child(
        &self,
        collection: &str,
        ancestor_id: &str,
        level: Level,
        child_id: &str,
        options: &StoreOptions,
    ) -> StoreResult<WriteOutcome> {
        self.record(options);
        self.inner
            .remove_child(collection, ancestor_id, level, child_id, options)
            .await
    }

    async fn delete_by_key(
        &self,
        collection: &str,
        id: &str,
        options: &StoreOptions,
    ) -> StoreResult<bool> {
        self.record(options);
        self.inner.delete_by_key(collection, id, options).await
    }
}

#[tokio::test]
async fn test_options_forwarded_to_every_store_call() {
    let store = Arc::new(RecordingStore::new());
    let service = service_over(store.clone());
    let session = StoreOptions::with_session("txn-42");

    service.create_referral("r", "pr", None, &session).await.unwrap();
    service
        .create_referral("u1", "p1", Some("r"), &session)
        .await
        .unwrap();
    service
        .update_referral_payload("u1", "p1b", &session)
        .await
        .unwrap();
    service.remove_referral("u1", &session).await.unwrap();

    let seen = store.seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|opts| opts.session.as_deref() == Some("txn-42")));
}
