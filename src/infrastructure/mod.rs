//! Infrastructure layer for HTTP access, persistence and configuration
//!
//! Concrete implementations of the domain's trait seams: the rate-limited
//! CRM HTTP client, the SQLite record store, configuration loading and
//! logging setup.

pub mod config;
pub mod crm_api;
pub mod database_connection;
pub mod http_client;
pub mod lead_repository;
pub mod logging;

// Re-export commonly used items
pub use config::{ApiConfig, SyncConfig, SyncTuning};
pub use crm_api::HttpCrmApi;
pub use database_connection::DatabaseConnection;
pub use http_client::{RateLimitedClient, RateLimitedClientConfig};
pub use lead_repository::SqliteLeadRepository;
pub use logging::init_logging;
