//! Wikisync - incremental synchronization of a dataset into a MediaWiki store.
//!
//! Every item of the dataset yields an optional binary asset and an optional
//! structured document; whole-catalog aggregates are document-only items. Their digests are kept in a [`HashLedger`], which is
//! published inside the metadata of a PNG [`Carrier`] on the wiki itself, so
//! each run only writes what changed since the last one.
//!
//! All wiki requests go through a [`RequestScheduler`], which dispatches at
//! most one request per tick in priority order.
//!
//! # Example
//!
//! ```ignore
//! use wikisync::{IconSource, RequestScheduler, SyncDriver, SyncOptions, WikiClient};
//!
//! let scheduler = RequestScheduler::per_minute(39);
//! let client = WikiClient::new("https://wiki.example/api.php", DEFAULT_USER_AGENT, scheduler)?;
//! client.login("Bot@sync", "secret").await?;
//!
//! let source = IconSource::new(DEFAULT_BASE_URL, DEFAULT_USER_AGENT, 10, ItemNaming::default())?;
//! let catalog = source.catalog().await?;
//! let feed = source
//!     .feed(catalog.records.clone())
//!     .with_items(source.aggregate_items(&catalog));
//!
//! let report = SyncDriver::new(client, SyncOptions::default())
//!     .run(feed, None)
//!     .await?;
//! ```

pub mod api;
pub mod carrier;
pub mod error;
pub mod http;
pub mod ledger;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
pub mod source;
pub mod sync;

pub use api::{ApiError, DEFAULT_USER_AGENT, WikiClient};
pub use carrier::{Carrier, CarrierError};
pub use error::{Result, SyncError};
pub use ledger::{Digest, HashLedger, LedgerError, Namespace};
pub use rate_limit::ApiRateLimiter;
pub use scheduler::{Priority, RequestScheduler, SchedulerError};
pub use shutdown::Shutdown;
pub use source::{
    Aggregate, Catalog, DEFAULT_BASE_URL, IconRecord, IconSource, ItemNaming, SourceError,
};
pub use sync::{SyncDriver, SyncOptions, SyncProgress, SyncReport};
