//! Shared test fixtures
//!
//! An in-memory CRM API mock plus a pre-wired context (mock API, in-memory
//! sqlite store, seeded customer store). The mock computes `fetch_stats`
//! by normalizing its own seeded payloads through the same routine the
//! engine uses, so local/remote agreement in tests reflects real behavior
//! rather than hand-matched fixtures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::application::use_cases::SyncUseCases;
use crate::domain::account::{Account, AccountRef, CustomerRecord, LinkedAccount};
use crate::domain::errors::{ApiError, SyncError};
use crate::domain::filter::FilterSpec;
use crate::domain::lead::{LeadPatch, LeadRecord};
use crate::domain::repositories::CustomerStore;
use crate::domain::services::{CrmApi, RawPage, ResourceKind};
use crate::domain::stats::{AggregateStats, PipelineCatalog};
use crate::infrastructure::config::SyncConfig;
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::lead_repository::SqliteLeadRepository;

/// The fixed account most tests operate on: customer 1, primary account.
pub fn test_account() -> Account {
    Account {
        account_ref: AccountRef::new(1, 0),
        base_url: "https://acme.example.com".to_string(),
        credential_ref: "cred-acme-primary".to_string(),
    }
}

/// A complete lead payload as the remote would send it. Name carries the
/// id so merge tests can tell which payload a field came from.
pub fn lead_json(id: i64) -> Value {
    json!({
        "id": id,
        "name": format!("lead-{id}"),
        "price": id * 100,
        "responsible_user_id": 7,
        "pipeline_id": 1,
        "status_id": 10,
        "created_at": 1_700_000_000 + id,
        "tags": [],
        "custom_fields": [],
    })
}

/// In-memory CRM API. Seeded payloads are served page by page; re-seeding
/// an account replaces its dataset, mimicking remote-side mutation between
/// pulls.
#[derive(Default)]
pub struct MockCrmApi {
    leads: Mutex<HashMap<AccountRef, Vec<Value>>>,
    pipelines: Mutex<HashMap<AccountRef, Vec<Value>>>,
    users: Mutex<HashMap<AccountRef, Vec<Value>>>,
    tags: Mutex<HashMap<AccountRef, Vec<Value>>>,
    fail_leads_on_page: Mutex<Option<u32>>,
    stats_calls: AtomicU32,
}

impl MockCrmApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the seeded lead payloads for an account.
    pub fn seed_leads(&self, account_ref: AccountRef, items: Vec<Value>) {
        self.leads.lock().unwrap().insert(account_ref, items);
    }

    /// Replace the seeded raw pipeline definitions for an account.
    pub fn seed_pipelines(&self, account_ref: AccountRef, items: Vec<Value>) {
        self.pipelines.lock().unwrap().insert(account_ref, items);
    }

    /// Replace the seeded user-directory entries for an account.
    pub fn seed_users(&self, account_ref: AccountRef, items: Vec<Value>) {
        self.users.lock().unwrap().insert(account_ref, items);
    }

    /// Replace the seeded tag-list entries for an account.
    pub fn seed_tags(&self, account_ref: AccountRef, items: Vec<Value>) {
        self.tags.lock().unwrap().insert(account_ref, items);
    }

    /// Make the next lead fetches for this page fail with a server error.
    pub fn fail_leads_on_page(&self, page: u32) {
        *self.fail_leads_on_page.lock().unwrap() = Some(page);
    }

    pub fn clear_failures(&self) {
        *self.fail_leads_on_page.lock().unwrap() = None;
    }

    /// How many times `fetch_stats` was hit; route-policy tests assert on
    /// this to prove which path produced a result.
    pub fn stats_calls(&self) -> u32 {
        self.stats_calls.load(Ordering::SeqCst)
    }

    fn seeded(&self, account_ref: AccountRef, kind: ResourceKind) -> Vec<Value> {
        let map = match kind {
            ResourceKind::Leads => self.leads.lock().unwrap(),
            ResourceKind::Pipelines => self.pipelines.lock().unwrap(),
            ResourceKind::Users => self.users.lock().unwrap(),
            ResourceKind::Tags => self.tags.lock().unwrap(),
        };
        map.get(&account_ref).cloned().unwrap_or_default()
    }

    /// Normalize the seeded payloads in order, merging by id, exactly as a
    /// full sync of this dataset would leave the local store.
    fn materialized_records(&self, account_ref: AccountRef) -> Result<Vec<LeadRecord>, ApiError> {
        let mut by_id: HashMap<i64, LeadRecord> = HashMap::new();
        for item in self.seeded(account_ref, ResourceKind::Leads) {
            let patch = LeadPatch::from_raw(&item)
                .map_err(|e| ApiError::malformed(0, e.reason))?;
            let record = patch
                .apply_to(by_id.remove(&patch.id))
                .map_err(|e| ApiError::malformed(0, e.reason))?;
            by_id.insert(record.id, record);
        }
        let mut records: Vec<LeadRecord> = by_id.into_values().collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    fn catalog(&self, account_ref: AccountRef) -> PipelineCatalog {
        let defs = self
            .seeded(account_ref, ResourceKind::Pipelines)
            .iter()
            .filter_map(PipelineCatalog::parse_pipeline)
            .collect();
        PipelineCatalog::new(defs)
    }
}

#[async_trait]
impl CrmApi for MockCrmApi {
    async fn fetch_page(
        &self,
        account: &Account,
        kind: ResourceKind,
        page: u32,
        page_size: u32,
    ) -> Result<RawPage, ApiError> {
        if kind == ResourceKind::Leads {
            let failing = *self.fail_leads_on_page.lock().unwrap();
            if failing == Some(page) {
                return Err(ApiError::ServerError { status: 500 });
            }
        }

        let items = self.seeded(account.account_ref, kind);
        let page_size = page_size.max(1) as usize;
        let start = (page.max(1) as usize - 1) * page_size;
        let end = (start + page_size).min(items.len());
        let slice = if start < items.len() { items[start..end].to_vec() } else { Vec::new() };
        Ok(RawPage { items: slice, has_more: end < items.len() })
    }

    async fn fetch_stats(
        &self,
        account: &Account,
        filter: &FilterSpec,
    ) -> Result<AggregateStats, ApiError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let records = self.materialized_records(account.account_ref)?;
        let catalog = self.catalog(account.account_ref);
        Ok(AggregateStats::compute(&records, filter, &catalog))
    }
}

/// Customer store backed by a plain map, pre-seeded for `test_account`.
#[derive(Default)]
pub struct InMemoryCustomerStore {
    customers: Mutex<HashMap<i64, CustomerRecord>>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        let store = Self::default();
        let account = test_account();
        store.insert(CustomerRecord {
            customer_id: account.account_ref.customer_id,
            primary_account: Some(LinkedAccount {
                base_url: account.base_url,
                credential_ref: account.credential_ref,
            }),
            additional_accounts: Vec::new(),
        });
        store
    }

    pub fn insert(&self, customer: CustomerRecord) {
        self.customers.lock().unwrap().insert(customer.customer_id, customer);
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn find_customer(&self, customer_id: i64) -> Result<Option<CustomerRecord>, SyncError> {
        Ok(self.customers.lock().unwrap().get(&customer_id).cloned())
    }
}

/// Mock API plus an in-memory sqlite store, migrated and ready.
pub struct TestContext {
    pub api: Arc<MockCrmApi>,
    pub store: Arc<SqliteLeadRepository>,
    pub customers: Arc<InMemoryCustomerStore>,
}

impl TestContext {
    pub async fn new() -> Self {
        let db = DatabaseConnection::new("sqlite::memory:")
            .await
            .unwrap_or_else(|e| panic!("in-memory database: {e}"));
        db.migrate().await.unwrap_or_else(|e| panic!("migrate: {e}"));
        Self {
            api: Arc::new(MockCrmApi::new()),
            store: Arc::new(SqliteLeadRepository::new(db.pool().clone())),
            customers: Arc::new(InMemoryCustomerStore::new()),
        }
    }

    /// Wire the full facade over this context with the given tuning.
    pub fn use_cases(&self, config: &SyncConfig) -> SyncUseCases {
        SyncUseCases::new(self.api.clone(), self.store.clone(), self.customers.clone(), config)
    }
}
