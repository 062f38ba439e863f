//! Shared sync types and constants.

use crate::ledger::{Digest, Namespace};

/// Default number of ledger mutations between checkpoints.
pub const DEFAULT_CHECKPOINT_EVERY: usize = 100;

/// Fixed name under which the ledger carrier is published.
pub const DEFAULT_LEDGER_FILE: &str = "Profile-Icons-V1-lockfile.png";

/// Maximum backoff delay in milliseconds when a checkpoint upload fails.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Maximum retries for a single checkpoint upload.
pub const MAX_PUBLISH_RETRIES: u32 = 5;

/// How an item compares to what the ledger says was last published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// No ledger entry for the id.
    New,
    /// Ledger entry exists with a different digest.
    Changed,
    /// Ledger entry matches the current digest.
    Unchanged,
}

impl Classification {
    /// Compare a current digest against the recorded one.
    pub fn of(recorded: Option<&Digest>, current: &Digest) -> Self {
        match recorded {
            None => Classification::New,
            Some(recorded) if recorded == current => Classification::Unchanged,
            Some(_) => Classification::Changed,
        }
    }

    /// Whether a write is required.
    pub fn needs_write(self) -> bool {
        !matches!(self, Classification::Unchanged)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Classification::New => "new",
            Classification::Changed => "changed",
            Classification::Unchanged => "unchanged",
        })
    }
}

/// Result of a successful write to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The store accepted new content.
    Written,
    /// The store reported the content as identical to what it already holds.
    Unchanged,
}

/// Binary asset for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPayload {
    /// Destination file name in the store.
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
    /// Page text for first-time uploads; not sent when replacing a file.
    pub description: Option<String>,
}

impl AssetPayload {
    pub fn digest(&self) -> Digest {
        Digest::compute(&self.bytes)
    }
}

/// Text document for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPayload {
    /// Destination page title.
    pub title: String,
    /// Canonical content representation; the digest is taken over these bytes.
    pub canonical: String,
    /// Rendered page text.
    pub text: String,
}

impl DocumentPayload {
    pub fn digest(&self) -> Digest {
        Digest::compute(self.canonical.as_bytes())
    }
}

/// Availability of an item's asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetState {
    Ready(AssetPayload),
    /// The item is a document only.
    Absent,
    /// The item has an asset, but it could not be retrieved.
    Unavailable { reason: String },
}

/// One dataset item ready for synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    pub id: u32,
    pub asset: AssetState,
    pub document: Option<DocumentPayload>,
}

/// Per-namespace classification counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceCounts {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
}

impl NamespaceCounts {
    pub fn record(&mut self, classification: Classification) {
        match classification {
            Classification::New => self.new += 1,
            Classification::Changed => self.changed += 1,
            Classification::Unchanged => self.unchanged += 1,
        }
    }

    /// Number of writes issued.
    pub fn written(&self) -> usize {
        self.new + self.changed
    }
}

/// Result of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub assets: NamespaceCounts,
    pub documents: NamespaceCounts,
    /// Items fully handled.
    pub processed: usize,
    /// Items whose asset could not be fetched.
    pub fetch_failed: usize,
    /// Ledger publications, including the final one.
    pub checkpoints: usize,
    /// Whether the run stopped early on a shutdown request.
    pub interrupted: bool,
    /// Whether the published ledger already matched the data, so nothing
    /// was fetched, written or published.
    pub up_to_date: bool,
}

impl SyncReport {
    pub fn counts(&self, namespace: Namespace) -> &NamespaceCounts {
        match namespace {
            Namespace::Asset => &self.assets,
            Namespace::Document => &self.documents,
        }
    }

    pub(crate) fn counts_mut(&mut self, namespace: Namespace) -> &mut NamespaceCounts {
        match namespace {
            Namespace::Asset => &mut self.assets,
            Namespace::Document => &mut self.documents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::DIGEST_LEN;

    #[test]
    fn classification_compares_recorded_digest() {
        let a = Digest::from_bytes([1; DIGEST_LEN]);
        let b = Digest::from_bytes([2; DIGEST_LEN]);

        assert_eq!(Classification::of(None, &a), Classification::New);
        assert_eq!(Classification::of(Some(&a), &a), Classification::Unchanged);
        assert_eq!(Classification::of(Some(&b), &a), Classification::Changed);
        assert!(Classification::New.needs_write());
        assert!(!Classification::Unchanged.needs_write());
    }

    #[test]
    fn document_digest_covers_canonical_form_only() {
        let doc = |text: &str| DocumentPayload {
            title: "Module:X".to_string(),
            canonical: r#"{"id":7}"#.to_string(),
            text: text.to_string(),
        };
        assert_eq!(doc("a").digest(), doc("b").digest());
        assert_eq!(doc("a").digest(), Digest::compute(br#"{"id":7}"#));
    }

    #[test]
    fn report_counts_by_namespace() {
        let mut report = SyncReport::default();
        report.counts_mut(Namespace::Asset).record(Classification::New);
        report.counts_mut(Namespace::Asset).record(Classification::Changed);
        report.counts_mut(Namespace::Document).record(Classification::Unchanged);

        assert_eq!(report.counts(Namespace::Asset).written(), 2);
        assert_eq!(report.counts(Namespace::Document).unchanged, 1);
        assert_eq!(report.counts(Namespace::Document).written(), 0);
    }
}
