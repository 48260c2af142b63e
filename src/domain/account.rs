//! Linked CRM account identity and resolution
//!
//! A customer may have zero, one, or many linked CRM accounts (one primary
//! plus an ordered list of additional ones). The sync engine never reads an
//! ambient "current account"; every operation receives an explicit
//! [`Account`] resolved from a `(customer_id, account_index)` pair.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::errors::SyncError;
use crate::domain::repositories::CustomerStore;

/// Identity of one linked CRM connection: customer plus account index.
///
/// Index 0 is the customer's primary account; additional accounts follow in
/// the order the customer linked them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRef {
    pub customer_id: i64,
    pub account_index: u32,
}

impl AccountRef {
    pub fn new(customer_id: i64, account_index: u32) -> Self {
        Self { customer_id, account_index }
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "customer {} / account {}", self.customer_id, self.account_index)
    }
}

/// One linked CRM connection with everything the client needs to reach it.
///
/// `credential_ref` is an opaque handle resolved by the external customer
/// store; the engine forwards it as the bearer credential and never stores
/// secrets itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_ref: AccountRef,
    pub base_url: String,
    pub credential_ref: String,
}

/// Connection details of a single linked account as held by the customer
/// record (before an index is attached).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub base_url: String,
    pub credential_ref: String,
}

/// Customer record as seen by the sync engine: read-only, maintained by the
/// external customer-management flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub customer_id: i64,
    /// Primary linked account, if the customer has connected a CRM at all.
    pub primary_account: Option<LinkedAccount>,
    /// Additional linked accounts, ordered; index 1 and up.
    pub additional_accounts: Vec<LinkedAccount>,
}

impl CustomerRecord {
    /// Linked account at `account_index` (0 = primary), or `None` when the
    /// index exceeds the known count.
    pub fn linked_account(&self, account_index: u32) -> Option<&LinkedAccount> {
        if account_index == 0 {
            self.primary_account.as_ref()
        } else {
            self.additional_accounts.get(account_index as usize - 1)
        }
    }

    /// Number of linked accounts (primary included).
    pub fn account_count(&self) -> u32 {
        let primary = u32::from(self.primary_account.is_some());
        primary + self.additional_accounts.len() as u32
    }
}

/// Maps `(customer_id, account_index)` to a concrete [`Account`].
#[derive(Clone)]
pub struct AccountResolver {
    customers: Arc<dyn CustomerStore>,
}

impl AccountResolver {
    pub fn new(customers: Arc<dyn CustomerStore>) -> Self {
        Self { customers }
    }

    /// Resolve one linked account. Fails with [`SyncError::AccountNotFound`]
    /// when the customer is unknown or the index exceeds the linked count.
    pub async fn resolve(&self, customer_id: i64, account_index: u32) -> Result<Account, SyncError> {
        let not_found = || SyncError::AccountNotFound { customer_id, account_index };

        let record = self
            .customers
            .find_customer(customer_id)
            .await?
            .ok_or_else(not_found)?;

        let linked = record.linked_account(account_index).ok_or_else(not_found)?;

        Ok(Account {
            account_ref: AccountRef::new(customer_id, account_index),
            base_url: linked.base_url.clone(),
            credential_ref: linked.credential_ref.clone(),
        })
    }
}
