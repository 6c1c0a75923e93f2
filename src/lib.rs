pub mod config;
pub mod error;
pub mod event;
pub mod live;
pub mod normalize;
pub mod permissions;
pub mod projections;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod test_utils;
pub mod write;

pub use config::CacheConfig;
pub use error::{CacheError, Result, SyncError, WriteError};
pub use event::{Event, RawEvent, SignedEvent, UnsignedEvent};
pub use live::Subscription;
pub use store::Store;
pub use sync::{SyncOptions, SyncOrchestrator, SyncStats};
pub use write::{WriteFlowService, WriteOutcome};
