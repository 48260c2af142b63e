//! Materialized snapshots of an account's lead set
//!
//! Readers get an `Arc<Snapshot>` and iterate it freely; replacing a
//! snapshot is a single reference swap inside the cache, so a reader can
//! never observe a torn, partially-replaced set. Background refreshes are
//! single-flight per account and only swap when the record-id composition
//! actually changed; additions and removals that cancel out in count are
//! still detected.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::domain::account::AccountRef;
use crate::domain::lead::LeadRecord;

/// The locally materialized lead set for one account at a point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub account_ref: AccountRef,
    pub records: Vec<LeadRecord>,
    pub fetched_at: DateTime<Utc>,
    /// Whether this set covers the account's full remote record set. Kept
    /// explicit; the aggregation route policy must never infer it.
    pub complete: bool,
}

impl Snapshot {
    pub fn new(account_ref: AccountRef, records: Vec<LeadRecord>, complete: bool) -> Self {
        Self { account_ref, records, fetched_at: Utc::now(), complete }
    }

    pub fn id_set(&self) -> BTreeSet<i64> {
        self.records.iter().map(|r| r.id).collect()
    }

    /// Composition comparison by record-id set, not by count.
    pub fn same_composition(&self, other: &Snapshot) -> bool {
        self.id_set() == other.id_set()
    }
}

/// Per-account snapshot cache with atomic swap semantics.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    snapshots: RwLock<HashMap<AccountRef, Arc<Snapshot>>>,
    refreshing: Mutex<HashSet<AccountRef>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, account_ref: AccountRef) -> Option<Arc<Snapshot>> {
        self.snapshots.read().await.get(&account_ref).cloned()
    }

    /// Unconditionally install a snapshot (used right after a full sync).
    pub async fn install(&self, snapshot: Snapshot) {
        let account_ref = snapshot.account_ref;
        self.snapshots.write().await.insert(account_ref, Arc::new(snapshot));
        debug!(%account_ref, "snapshot installed");
    }

    /// Swap in a refreshed snapshot when its composition differs from the
    /// held one, or when it upgrades a partial snapshot to a complete one.
    /// Returns whether the swap happened.
    pub async fn swap_if_changed(&self, candidate: Snapshot) -> bool {
        let account_ref = candidate.account_ref;
        let mut snapshots = self.snapshots.write().await;
        if let Some(current) = snapshots.get(&account_ref) {
            let upgrades_completeness = candidate.complete && !current.complete;
            if current.same_composition(&candidate) && !upgrades_completeness {
                debug!(%account_ref, "refresh found identical composition, keeping snapshot");
                return false;
            }
        }
        snapshots.insert(account_ref, Arc::new(candidate));
        debug!(%account_ref, "snapshot swapped after refresh");
        true
    }

    pub async fn invalidate(&self, account_ref: AccountRef) {
        self.snapshots.write().await.remove(&account_ref);
    }

    /// Drop snapshots for every account of a customer (active-account
    /// switch; snapshots are not interchangeable across accounts).
    pub async fn invalidate_customer(&self, customer_id: i64) {
        self.snapshots
            .write()
            .await
            .retain(|account_ref, _| account_ref.customer_id != customer_id);
    }

    /// Single-flight guard for background refresh: returns false when a
    /// refresh for the account is already in progress.
    pub async fn begin_refresh(&self, account_ref: AccountRef) -> bool {
        self.refreshing.lock().await.insert(account_ref)
    }

    pub async fn end_refresh(&self, account_ref: AccountRef) {
        self.refreshing.lock().await.remove(&account_ref);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(id: i64) -> LeadRecord {
        LeadRecord {
            id,
            name: format!("lead-{id}"),
            price: 0,
            responsible_user_id: None,
            pipeline_id: 1,
            status_id: 10,
            created_at: 0,
            closed_at: None,
            tags: vec![],
            custom_fields: vec![],
            is_deleted: false,
        }
    }

    fn acc() -> AccountRef {
        AccountRef::new(1, 0)
    }

    #[tokio::test]
    async fn identical_composition_is_not_swapped() {
        let cache = SnapshotCache::new();
        cache.install(Snapshot::new(acc(), vec![lead(1), lead(2)], true)).await;

        // Same ids in a different order, different field contents.
        let mut replacement = lead(2);
        replacement.price = 999;
        let swapped = cache
            .swap_if_changed(Snapshot::new(acc(), vec![replacement, lead(1)], true))
            .await;
        assert!(!swapped);
    }

    #[tokio::test]
    async fn completed_refresh_upgrades_a_partial_snapshot() {
        let cache = SnapshotCache::new();
        cache.install(Snapshot::new(acc(), vec![lead(1), lead(2)], false)).await;

        // Same ids, but the refresh finished a full walk: the partial
        // snapshot must be replaced so filtered queries can go local again.
        let swapped = cache
            .swap_if_changed(Snapshot::new(acc(), vec![lead(1), lead(2)], true))
            .await;
        assert!(swapped);
        assert!(cache.get(acc()).await.unwrap().complete);

        // A second identical complete refresh changes nothing.
        let swapped = cache
            .swap_if_changed(Snapshot::new(acc(), vec![lead(1), lead(2)], true))
            .await;
        assert!(!swapped);
    }

    #[tokio::test]
    async fn cancelling_churn_is_still_detected() {
        let cache = SnapshotCache::new();
        cache.install(Snapshot::new(acc(), vec![lead(1), lead(2)], true)).await;

        // One removal plus one addition: count unchanged, composition not.
        let swapped = cache
            .swap_if_changed(Snapshot::new(acc(), vec![lead(1), lead(3)], true))
            .await;
        assert!(swapped);
        let held = cache.get(acc()).await.unwrap();
        assert_eq!(held.id_set(), BTreeSet::from([1, 3]));
    }

    #[tokio::test]
    async fn refresh_guard_is_single_flight() {
        let cache = SnapshotCache::new();
        assert!(cache.begin_refresh(acc()).await);
        assert!(!cache.begin_refresh(acc()).await);
        cache.end_refresh(acc()).await;
        assert!(cache.begin_refresh(acc()).await);
    }

    #[tokio::test]
    async fn customer_invalidation_spares_other_customers() {
        let cache = SnapshotCache::new();
        cache.install(Snapshot::new(AccountRef::new(1, 0), vec![lead(1)], true)).await;
        cache.install(Snapshot::new(AccountRef::new(1, 1), vec![lead(2)], true)).await;
        cache.install(Snapshot::new(AccountRef::new(2, 0), vec![lead(3)], true)).await;

        cache.invalidate_customer(1).await;
        assert!(cache.get(AccountRef::new(1, 0)).await.is_none());
        assert!(cache.get(AccountRef::new(1, 1)).await.is_none());
        assert!(cache.get(AccountRef::new(2, 0)).await.is_some());
    }

    #[tokio::test]
    async fn readers_holding_old_arc_keep_a_consistent_view() {
        let cache = SnapshotCache::new();
        cache.install(Snapshot::new(acc(), vec![lead(1)], true)).await;
        let reader_view = cache.get(acc()).await.unwrap();

        cache.swap_if_changed(Snapshot::new(acc(), vec![lead(1), lead(2)], true)).await;

        // The old Arc still sees the old set; new readers the new one.
        assert_eq!(reader_view.records.len(), 1);
        assert_eq!(cache.get(acc()).await.unwrap().records.len(), 2);
    }
}
