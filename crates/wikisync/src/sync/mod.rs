//! Incremental sync of items into a remote store.
//!
//! # Module Structure
//!
//! - [`types`] - Items, payloads, classification, `SyncReport`, constants
//! - [`progress`] - Progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//! - [`store`] - The `RemoteStore` and `ItemFeed` seams
//! - [`driver`] - `SyncDriver`, the conditional-write loop with checkpoints
//!
//! # Example
//!
//! ```ignore
//! use wikisync::sync::{SyncDriver, SyncOptions};
//!
//! let driver = SyncDriver::new(client, SyncOptions::default());
//! let report = driver.run(source.feed(catalog.records), None).await?;
//! println!("Wrote {} assets", report.assets.written());
//! ```

pub mod driver;
mod progress;
pub mod store;
mod types;

// Re-export types
pub use types::{
    AssetPayload, AssetState, Classification, DocumentPayload, NamespaceCounts, SyncItem,
    SyncReport, WriteOutcome,
};

// Re-export constants
pub use types::{
    DEFAULT_CHECKPOINT_EVERY, DEFAULT_LEDGER_FILE, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS,
    MAX_PUBLISH_RETRIES,
};

// Re-export progress types
pub use progress::{ProgressCallback, SyncProgress, emit};

pub use driver::{SyncDriver, SyncOptions};
pub use store::{CARRIER_MIME, ItemFeed, RemoteStore};
