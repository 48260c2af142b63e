//! Application layer - sync workflows and aggregation
//!
//! Composes the domain seams into the engine's operations: chunked page
//! pulls, full-sync orchestration (fire-and-forget and caller-driven),
//! snapshot caching with freshness-driven background refresh, and the dual
//! local/remote statistics paths.

pub mod aggregator;
pub mod chunk_worker;
pub mod dto;
pub mod freshness;
pub mod orchestrator;
pub mod snapshot;
pub mod use_cases;

// Re-export commonly used items
pub use aggregator::{AggregationRoute, StatsAggregator};
pub use chunk_worker::{ChunkOutcome, ChunkedSyncWorker};
pub use dto::{ChunkStatus, SnapshotView, StartSyncAck, SyncRunStatusDto};
pub use freshness::FreshnessPolicy;
pub use orchestrator::SyncOrchestrator;
pub use snapshot::{Snapshot, SnapshotCache};
pub use use_cases::SyncUseCases;
