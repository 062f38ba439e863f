//! Progress reporting types for sync runs.
//!
//! The driver emits [`SyncProgress`] events through an optional callback;
//! rendering them is left to the caller.

use crate::ledger::Namespace;

use super::types::{Classification, SyncReport};

/// Progress events emitted during a sync run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// Fetching the published ledger carrier.
    LoadingLedger {
        /// Store name of the carrier.
        file: String,
    },

    /// Ledger decoded and ready.
    LedgerLoaded {
        /// Entries in the asset namespace.
        assets: usize,
        /// Entries in the document namespace.
        documents: usize,
        /// True if no carrier was published yet and an empty ledger is used.
        fresh: bool,
    },

    /// The published carrier already matches the data; nothing to do.
    UpToDate {
        /// Items compared.
        items: usize,
    },

    /// Starting to walk the dataset.
    SyncingItems {
        /// Number of items, if known up front.
        total: Option<usize>,
    },

    /// One namespace of one item was classified and, if needed, written.
    ItemSynced {
        id: u32,
        namespace: Namespace,
        classification: Classification,
        /// True if the store reported the write as a no-op.
        unchanged_remotely: bool,
    },

    /// All namespaces of an item were handled.
    ItemProcessed {
        id: u32,
        /// Running count of processed items.
        processed: usize,
    },

    /// The item's asset could not be retrieved; its document still syncs.
    AssetUnavailable {
        id: u32,
        /// Why the asset is missing.
        reason: String,
    },

    /// Publishing the ledger carrier.
    PersistingLedger {
        /// Entries in the asset namespace.
        assets: usize,
        /// Entries in the document namespace.
        documents: usize,
        /// Whether this is the last publication of the run.
        final_checkpoint: bool,
    },

    /// Ledger carrier published.
    LedgerPersisted {
        /// True if the store already held identical bytes.
        unchanged: bool,
    },

    /// A retryable failure, backing off before the next attempt.
    RetryBackoff {
        /// What is being retried.
        operation: String,
        /// Time to wait before retry (ms).
        retry_after_ms: u64,
        /// Current attempt number.
        attempt: u32,
    },

    /// A shutdown request was observed; the run stops after the current item.
    ShutdownObserved {
        /// Items processed before stopping.
        processed: usize,
    },

    /// Warning message (non-fatal).
    Warning {
        /// Warning message.
        message: String,
    },

    /// The run finished (successfully or after a shutdown request).
    SyncComplete {
        /// Final counts.
        report: SyncReport,
    },
}

/// Callback for progress updates during a sync run.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
///
/// # Example
///
/// ```ignore
/// use wikisync::sync::{emit, SyncProgress, ProgressCallback};
///
/// fn step(on_progress: Option<&ProgressCallback>) {
///     emit(on_progress, SyncProgress::SyncingItems { total: Some(42) });
/// }
/// ```
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn emit_with_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let callback: ProgressCallback = Box::new(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emit(Some(&callback), SyncProgress::SyncingItems { total: Some(3) });
        emit(
            Some(&callback),
            SyncProgress::LedgerPersisted { unchanged: false },
        );

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_without_callback() {
        emit(None, SyncProgress::SyncingItems { total: None });
    }

    #[test]
    fn events_are_delivered_in_order() {
        let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&seen);
        let callback: ProgressCallback = Box::new(move |event| {
            if let SyncProgress::ItemProcessed { id, .. } = event {
                capture.lock().unwrap().push(id);
            }
        });

        for id in [3, 1, 2] {
            emit(
                Some(&callback),
                SyncProgress::ItemProcessed { id, processed: 0 },
            );
        }

        assert_eq!(*seen.lock().unwrap(), vec![3, 1, 2]);
    }

    #[test]
    fn item_synced_debug_names_namespace() {
        let event = SyncProgress::ItemSynced {
            id: 7,
            namespace: Namespace::Asset,
            classification: Classification::New,
            unchanged_remotely: false,
        };
        let debug_str = format!("{event:?}");
        assert!(debug_str.contains("Asset"));
        assert!(debug_str.contains("New"));
    }
}
