//! Error taxonomy for the sync engine
//!
//! Two layers: [`ApiError`] classifies remote CRM API failures at the
//! transport boundary (and determines retryability), [`SyncError`] is what
//! the engine surfaces to callers.

use thiserror::Error;

use crate::domain::account::AccountRef;

/// Classified failure of one remote CRM API call.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// HTTP 429. Retryable with backoff.
    #[error("rate limited by remote CRM API")]
    RateLimited,

    /// HTTP 401/403. Credentials invalid or revoked; never retried silently.
    #[error("remote CRM API rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    /// HTTP 404. Terminal for that resource; non-fatal to the overall sync
    /// when it affects an optional sub-resource such as tags.
    #[error("remote resource not found: {resource}")]
    NotFound { resource: String },

    /// HTTP 5xx. Retryable with backoff.
    #[error("remote CRM API server error (HTTP {status})")]
    ServerError { status: u16 },

    /// Network-level failure (connect, timeout, DNS). Retryable.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// Payload did not match the expected shape. Terminal for that chunk;
    /// carries the page index for diagnosis.
    #[error("malformed response on page {page}: {reason}")]
    MalformedResponse { page: u32, reason: String },
}

impl ApiError {
    /// Whether the classified failure is worth a bounded retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited | ApiError::ServerError { .. } | ApiError::Transport { .. }
        )
    }

    pub fn malformed(page: u32, reason: impl Into<String>) -> Self {
        ApiError::MalformedResponse { page, reason: reason.into() }
    }
}

/// Engine-level error surfaced to callers.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A full sync for this account is already in flight. Returned
    /// immediately; not an error state that requires retry.
    #[error("a full sync is already running for {account_ref}")]
    ConcurrentSyncRejected { account_ref: AccountRef },

    #[error("no linked CRM account at index {account_index} for customer {customer_id}")]
    AccountNotFound { customer_id: i64, account_index: u32 },

    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl SyncError {
    pub fn storage(message: impl Into<String>) -> Self {
        SyncError::Storage { message: message.into() }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Storage { message: err.to_string() }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Storage { message: format!("stored payload corrupt: {err}") }
    }
}
