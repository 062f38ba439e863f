//! Progress reporting for sync runs.
//!
//! Every [`SyncProgress`] event maps to one structured tracing call; the
//! subscriber installed in `main` decides how it is rendered.

use std::sync::Arc;

use wikisync::sync::{Classification, ProgressCallback, SyncProgress};

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    /// Convert to a ProgressCallback for the library.
    pub fn as_callback(self: &Arc<Self>) -> ProgressCallback {
        let reporter = Arc::clone(self);
        Box::new(move |event| reporter.handle(event))
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::LoadingLedger { file } => {
                tracing::info!(file = %file, "Loading ledger");
            }

            SyncProgress::LedgerLoaded {
                assets,
                documents,
                fresh,
            } => {
                if fresh {
                    tracing::info!("No ledger published yet, every item counts as new");
                } else {
                    tracing::info!(assets, documents, "Ledger loaded");
                }
            }

            SyncProgress::UpToDate { items } => {
                tracing::info!(items, "Published ledger matches, nothing to do");
            }

            SyncProgress::SyncingItems { total } => {
                tracing::info!(total = ?total, "Syncing items");
            }

            SyncProgress::ItemSynced {
                id,
                namespace,
                classification,
                unchanged_remotely,
            } => match classification {
                Classification::Unchanged => {
                    tracing::debug!(id, namespace = %namespace, "Unchanged");
                }
                _ if unchanged_remotely => {
                    tracing::info!(
                        id,
                        namespace = %namespace,
                        classification = %classification,
                        "Already up to date on the wiki"
                    );
                }
                _ => {
                    tracing::info!(
                        id,
                        namespace = %namespace,
                        classification = %classification,
                        "Written"
                    );
                }
            },

            SyncProgress::ItemProcessed { id, processed } => {
                tracing::debug!(id, processed, "Item processed");
            }

            SyncProgress::AssetUnavailable { id, reason } => {
                tracing::warn!(id, reason = %reason, "Asset unavailable, document only");
            }

            SyncProgress::PersistingLedger {
                assets,
                documents,
                final_checkpoint,
            } => {
                if final_checkpoint {
                    tracing::info!(assets, documents, "Saving final ledger");
                } else {
                    tracing::debug!(assets, documents, "Saving ledger checkpoint");
                }
            }

            SyncProgress::LedgerPersisted { unchanged } => {
                tracing::debug!(unchanged, "Ledger saved");
            }

            SyncProgress::RetryBackoff {
                operation,
                retry_after_ms,
                attempt,
            } => {
                tracing::warn!(
                    operation = %operation,
                    retry_after_ms,
                    attempt,
                    "Retrying after failure"
                );
            }

            SyncProgress::ShutdownObserved { processed } => {
                tracing::warn!(processed, "Stopping early on shutdown request");
            }

            SyncProgress::Warning { message } => {
                tracing::warn!(message = %message, "Warning");
            }

            SyncProgress::SyncComplete { report } => {
                tracing::info!(
                    processed = report.processed,
                    assets_written = report.assets.written(),
                    documents_written = report.documents.written(),
                    checkpoints = report.checkpoints,
                    "Sync finished"
                );
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
