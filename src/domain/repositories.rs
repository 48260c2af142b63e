//! Persistence interfaces for the sync engine
//!
//! Trait seams for the two external stores the engine depends on: the lead
//! record store it owns the contents of, and the read-only customer store
//! maintained by external customer-management flows.

use async_trait::async_trait;

use crate::domain::account::{AccountRef, CustomerRecord};
use crate::domain::errors::SyncError;
use crate::domain::filter::FilterSpec;
use crate::domain::lead::{LeadPatch, LeadRecord};
use crate::domain::stats::{AggregateStats, PipelineCatalog};

/// Persisted lead records, keyed by `(account_ref, lead id)`.
///
/// All writers go through `upsert`; the merge guarantee (a patch never
/// erases a field it did not supply) lives behind this trait so replaying a
/// page any number of times stays idempotent.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or merge one record. Fields absent from the patch keep their
    /// stored value.
    async fn upsert(&self, account_ref: AccountRef, patch: &LeadPatch) -> Result<(), SyncError>;

    /// Read records for an account; `None` returns the full locally-known
    /// snapshot.
    async fn bulk_read(
        &self,
        account_ref: AccountRef,
        filter: Option<&FilterSpec>,
    ) -> Result<Vec<LeadRecord>, SyncError>;

    /// Aggregate with the predicate pushed down to the store. Must agree
    /// with the in-memory aggregation for every filter.
    async fn count(
        &self,
        account_ref: AccountRef,
        filter: &FilterSpec,
        catalog: &PipelineCatalog,
    ) -> Result<AggregateStats, SyncError>;

    /// Number of records held locally for the account.
    async fn record_count(&self, account_ref: AccountRef) -> Result<u64, SyncError>;
}

/// Read-only lookup of customer records with their linked CRM accounts.
/// Implemented by the external customer CRUD store.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn find_customer(&self, customer_id: i64) -> Result<Option<CustomerRecord>, SyncError>;
}
