//! Domain module - Core business logic and entities
//!
//! Contains the entities, value objects, trait seams and in-memory sync-run
//! state that represent the synchronization engine's core business logic.

pub mod account;
pub mod errors;
pub mod filter;
pub mod lead;
pub mod repositories;
pub mod services;
pub mod stats;
pub mod sync_session;

// Re-export commonly used items
pub use account::{Account, AccountRef, AccountResolver, CustomerRecord, LinkedAccount};
pub use errors::{ApiError, SyncError};
pub use filter::{DateField, FilterSpec};
pub use lead::{CustomFieldValue, LeadPatch, LeadRecord, Tag};
pub use stats::{AggregateStats, PipelineCatalog, PipelineStageStat, StageStat, StageType};
pub use sync_session::{SyncRun, SyncRunStatus, SyncSessionManager};
