//! crmsync - CRM lead synchronization and analytics aggregation engine
//!
//! Pulls a remote CRM's lead/deal records page by page (rate-limited,
//! resumable in bounded chunks), persists them incrementally, and computes
//! aggregate pipeline statistics either locally from a cached snapshot or
//! remotely through the CRM's own aggregation endpoint, with both paths
//! guaranteed to agree for the same filter.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

// Test support (mock CRM API, seeded contexts). Kept in the library so the
// integration tests under tests/ can share it.
pub mod test_utils;

// Re-export the caller-facing surface
pub use application::dto::{ChunkStatus, SnapshotView, StartSyncAck, SyncRunStatusDto};
pub use application::use_cases::SyncUseCases;
pub use domain::errors::{ApiError, SyncError};
