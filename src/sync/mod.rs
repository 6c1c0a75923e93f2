//! Incremental sync: fetch from remote sources, normalize, commit events and
//! projections, advance cursors.

pub mod fetcher;
pub mod orchestrator;

pub use fetcher::{FetchBatch, FetchRequest, Fetcher, JsonFileFetcher, StreamKinds};
pub use orchestrator::{IngestContext, PostIngestHook, SyncOptions, SyncOrchestrator};

use serde::{Deserialize, Serialize};

/// Counters for one orchestrator call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Fetch calls issued.
    pub requests: u64,
    /// Raw events returned, before normalization and dedupe.
    pub fetched_events: u64,
    /// Events that were not stored before.
    pub new_events: u64,
    /// Cursor advances committed.
    pub cursor_updates: u64,
}
