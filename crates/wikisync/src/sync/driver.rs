//! Incremental sync driver.
//!
//! For every item the driver compares the digest of each namespace against
//! the ledger, writes only what is new or changed, records the new digest,
//! and periodically publishes the ledger inside its carrier image.
//!
//! With `precheck` enabled the feed is drained first. If the carrier built
//! from the complete current ledger hashes to the SHA-1 the store reports for
//! the published one, the run ends there without downloading or writing.

use sha1::{Digest as _, Sha1};

use crate::api::{ApiError, short_error_message};
use crate::carrier::Carrier;
use crate::error::{Result, SyncError};
use crate::ledger::{Digest, HashLedger, Namespace};
use crate::retry::{RetryConfig, with_retry};
use crate::shutdown::Shutdown;

use super::progress::{ProgressCallback, SyncProgress, emit};
use super::store::{ItemFeed, RemoteStore};
use super::types::{
    AssetPayload, AssetState, Classification, DEFAULT_CHECKPOINT_EVERY, DEFAULT_LEDGER_FILE,
    DocumentPayload, SyncItem, SyncReport, WriteOutcome,
};

/// Options for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Ledger mutations between checkpoints (0 is treated as 1).
    pub checkpoint_every: usize,
    /// Store name of the ledger carrier.
    pub ledger_file: String,
    /// Backoff for transport failures while publishing the ledger.
    pub retry: RetryConfig,
    /// Compare the complete current ledger with the published carrier before
    /// syncing. Holds every item in memory until the comparison is done.
    pub precheck: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            ledger_file: DEFAULT_LEDGER_FILE.to_string(),
            retry: RetryConfig::default(),
            precheck: true,
        }
    }
}

/// Ledger state of a run.
struct Session {
    carrier: Carrier,
    ledger: HashLedger,
    /// Ledger mutations since the last checkpoint.
    pending: usize,
}

enum Payload<'a> {
    Asset(&'a AssetPayload),
    Document(&'a DocumentPayload),
}

/// Runs the conditional-write protocol against a [`RemoteStore`].
///
/// # Example
///
/// ```ignore
/// let driver = SyncDriver::new(client, SyncOptions::default()).with_shutdown(shutdown);
/// let report = driver.run(source.feed(catalog.records), Some(&callback)).await?;
/// println!("{} documents written", report.documents.written());
/// ```
pub struct SyncDriver<S> {
    store: S,
    options: SyncOptions,
    shutdown: Shutdown,
    template: Option<Carrier>,
}

impl<S: RemoteStore> SyncDriver<S> {
    pub fn new(store: S, options: SyncOptions) -> Self {
        Self {
            store,
            options,
            shutdown: Shutdown::new(),
            template: None,
        }
    }

    /// Observe `shutdown` between items.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Carrier image used when no ledger has been published yet.
    #[must_use]
    pub fn with_carrier_template(mut self, carrier: Carrier) -> Self {
        self.template = Some(carrier);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Fetch and decode the published ledger.
    ///
    /// A missing carrier yields an empty ledger; a malformed one is an error.
    pub async fn load_ledger(&self) -> Result<HashLedger> {
        Ok(self.load_session(None).await?.ledger)
    }

    async fn load_session(&self, on_progress: Option<&ProgressCallback>) -> Result<Session> {
        let file = &self.options.ledger_file;
        emit(on_progress, SyncProgress::LoadingLedger { file: file.clone() });

        let published = self
            .store
            .fetch_ledger(file)
            .await
            .map_err(|source| SyncError::LoadLedger {
                file: file.clone(),
                source,
            })?;

        let fresh = published.is_none();
        let carrier = match published {
            Some(bytes) => Carrier::load(&bytes)?,
            None => {
                tracing::info!(file = %file, "No published ledger, starting from an empty one");
                self.template.clone().unwrap_or_else(Carrier::blank)
            }
        };
        let ledger = carrier.extract_ledger()?;

        let (assets, documents) = (
            ledger.len(Namespace::Asset),
            ledger.len(Namespace::Document),
        );
        tracing::info!(assets, documents, "Ledger loaded");
        emit(
            on_progress,
            SyncProgress::LedgerLoaded {
                assets,
                documents,
                fresh,
            },
        );

        Ok(Session {
            carrier,
            ledger,
            pending: 0,
        })
    }

    /// The carrier that would be published for `ledger`: the template (or a
    /// blank image) with the ledger embedded.
    pub fn carrier_for(&self, ledger: &HashLedger) -> Carrier {
        let mut carrier = self.template.clone().unwrap_or_else(Carrier::blank);
        carrier.embed_ledger(ledger);
        carrier
    }

    /// Whether the published carrier already holds exactly `ledger`.
    ///
    /// Compares the SHA-1 the store reports for the published carrier with
    /// that of [`Self::carrier_for`]; the carrier itself is not downloaded.
    pub async fn is_published(&self, ledger: &HashLedger) -> Result<bool> {
        let file = &self.options.ledger_file;
        let published = self
            .store
            .ledger_checksum(file)
            .await
            .map_err(|source| SyncError::LoadLedger {
                file: file.clone(),
                source,
            })?;
        let Some(published) = published else {
            return Ok(false);
        };
        let expected = hex::encode(Sha1::digest(self.carrier_for(ledger).to_bytes()));
        tracing::debug!(file = %file, %expected, %published, "Compared ledger checksums");
        Ok(expected.eq_ignore_ascii_case(&published))
    }

    /// Synchronize every item of `feed`.
    ///
    /// The ledger is published every `checkpoint_every` mutations and once
    /// more at the end. The final publication also runs when an item fails
    /// or a shutdown is requested, so the next run resumes from there.
    pub async fn run<F: ItemFeed>(
        &self,
        mut feed: F,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<SyncReport> {
        if !self.options.precheck {
            return self.run_feed(feed, on_progress).await;
        }

        let mut items = Vec::with_capacity(feed.size_hint().unwrap_or_default());
        while !self.shutdown.is_requested() {
            let Some(item) = feed.next_item().await else {
                break;
            };
            items.push(item);
        }

        // An interrupted collection has no complete ledger to compare.
        if !self.shutdown.is_requested() {
            let ledger = current_ledger(&items);
            if self.is_published(&ledger).await? {
                return Ok(self.finish_up_to_date(&items, on_progress));
            }
        }

        self.run_feed(items.into_iter(), on_progress).await
    }

    fn finish_up_to_date(
        &self,
        items: &[SyncItem],
        on_progress: Option<&ProgressCallback>,
    ) -> SyncReport {
        let mut report = SyncReport {
            processed: items.len(),
            up_to_date: true,
            ..SyncReport::default()
        };
        for item in items {
            match &item.asset {
                AssetState::Ready(_) => report.assets.record(Classification::Unchanged),
                AssetState::Unavailable { .. } => report.fetch_failed += 1,
                AssetState::Absent => {}
            }
            if item.document.is_some() {
                report.documents.record(Classification::Unchanged);
            }
        }

        tracing::info!(
            file = %self.options.ledger_file,
            items = items.len(),
            "Everything is up to date"
        );
        emit(on_progress, SyncProgress::UpToDate { items: items.len() });
        emit(
            on_progress,
            SyncProgress::SyncComplete {
                report: report.clone(),
            },
        );
        report
    }

    async fn run_feed<F: ItemFeed>(
        &self,
        mut feed: F,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<SyncReport> {
        let mut session = self.load_session(on_progress).await?;
        let mut report = SyncReport::default();

        emit(
            on_progress,
            SyncProgress::SyncingItems {
                total: feed.size_hint(),
            },
        );

        let outcome = self
            .process(&mut feed, &mut session, &mut report, on_progress)
            .await;
        let persisted = self
            .checkpoint(&mut session, &mut report, true, on_progress)
            .await;

        match (outcome, persisted) {
            (Err(err), Err(persist_err)) => {
                tracing::error!(error = %persist_err, "Final ledger checkpoint failed");
                let reason = persist_err
                    .api_error()
                    .map(short_error_message)
                    .unwrap_or_else(|| persist_err.to_string());
                emit(
                    on_progress,
                    SyncProgress::Warning {
                        message: format!("ledger not saved: {reason}"),
                    },
                );
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), Err(persist_err)) => Err(persist_err),
            (Ok(()), Ok(())) => {
                tracing::info!(
                    processed = report.processed,
                    interrupted = report.interrupted,
                    "Sync complete"
                );
                emit(
                    on_progress,
                    SyncProgress::SyncComplete {
                        report: report.clone(),
                    },
                );
                Ok(report)
            }
        }
    }

    async fn process<F: ItemFeed>(
        &self,
        feed: &mut F,
        session: &mut Session,
        report: &mut SyncReport,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let every = self.options.checkpoint_every.max(1);

        loop {
            if self.shutdown.is_requested() {
                report.interrupted = true;
                tracing::info!(processed = report.processed, "Shutdown requested, stopping");
                emit(
                    on_progress,
                    SyncProgress::ShutdownObserved {
                        processed: report.processed,
                    },
                );
                return Ok(());
            }

            let Some(item) = feed.next_item().await else {
                return Ok(());
            };

            self.sync_item(&item, session, report, on_progress).await?;
            report.processed += 1;
            emit(
                on_progress,
                SyncProgress::ItemProcessed {
                    id: item.id,
                    processed: report.processed,
                },
            );

            if session.pending >= every {
                self.checkpoint(session, report, false, on_progress).await?;
            }
        }
    }

    async fn sync_item(
        &self,
        item: &SyncItem,
        session: &mut Session,
        report: &mut SyncReport,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        match &item.asset {
            AssetState::Ready(asset) => {
                self.sync_namespace(
                    item.id,
                    Payload::Asset(asset),
                    session,
                    report,
                    on_progress,
                )
                .await?;
            }
            AssetState::Absent => {}
            AssetState::Unavailable { reason } => {
                report.fetch_failed += 1;
                emit(
                    on_progress,
                    SyncProgress::AssetUnavailable {
                        id: item.id,
                        reason: reason.clone(),
                    },
                );
            }
        }

        if let Some(document) = &item.document {
            self.sync_namespace(
                item.id,
                Payload::Document(document),
                session,
                report,
                on_progress,
            )
            .await?;
        }
        Ok(())
    }

    async fn sync_namespace(
        &self,
        id: u32,
        payload: Payload<'_>,
        session: &mut Session,
        report: &mut SyncReport,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let (namespace, digest): (Namespace, Digest) = match &payload {
            Payload::Asset(asset) => (Namespace::Asset, asset.digest()),
            Payload::Document(document) => (Namespace::Document, document.digest()),
        };

        let recorded = session.ledger.get(namespace, id);
        let classification = Classification::of(recorded.as_ref(), &digest);

        let mut unchanged_remotely = false;
        if classification.needs_write() {
            let outcome = self.write(&payload, classification).await.map_err(|source| {
                tracing::error!(id, %namespace, error = %short_error_message(&source), "Write failed");
                SyncError::Write {
                    id,
                    namespace,
                    source,
                }
            })?;
            unchanged_remotely = outcome == WriteOutcome::Unchanged;

            // The store holds this content either way.
            session.ledger.set(namespace, id, digest);
            session.pending += 1;
        }

        report.counts_mut(namespace).record(classification);
        tracing::debug!(id, %namespace, %classification, unchanged_remotely, "Item synced");
        emit(
            on_progress,
            SyncProgress::ItemSynced {
                id,
                namespace,
                classification,
                unchanged_remotely,
            },
        );
        Ok(())
    }

    async fn write(
        &self,
        payload: &Payload<'_>,
        classification: Classification,
    ) -> std::result::Result<WriteOutcome, ApiError> {
        match payload {
            Payload::Asset(asset) => {
                // Replacing a file keeps its existing description page.
                let description = match classification {
                    Classification::New => asset.description.as_deref(),
                    _ => None,
                };
                self.store.upload_asset(asset, description).await
            }
            Payload::Document(document) => self.store.put_document(document).await,
        }
    }

    /// Embed the ledger and publish the carrier.
    async fn checkpoint(
        &self,
        session: &mut Session,
        report: &mut SyncReport,
        final_checkpoint: bool,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let (assets, documents) = (
            session.ledger.len(Namespace::Asset),
            session.ledger.len(Namespace::Document),
        );
        emit(
            on_progress,
            SyncProgress::PersistingLedger {
                assets,
                documents,
                final_checkpoint,
            },
        );

        session.carrier.embed_ledger(&session.ledger);
        let bytes = session.carrier.to_bytes();
        let file = &self.options.ledger_file;

        let outcome = with_retry(
            || self.store.publish_ledger(file, &bytes),
            ApiError::is_transient,
            "ledger checkpoint",
            self.options.retry.clone().into_backoff(),
            on_progress,
        )
        .await
        .map_err(|source| SyncError::Checkpoint {
            file: file.clone(),
            source,
        })?;

        session.pending = 0;
        report.checkpoints += 1;
        let unchanged = outcome == WriteOutcome::Unchanged;
        tracing::info!(
            assets,
            documents,
            bytes = bytes.len(),
            final_checkpoint,
            unchanged,
            "Ledger published"
        );
        emit(on_progress, SyncProgress::LedgerPersisted { unchanged });
        Ok(())
    }
}

/// The ledger the store would hold once every item is synced.
fn current_ledger(items: &[SyncItem]) -> HashLedger {
    let mut ledger = HashLedger::new();
    for item in items {
        if let AssetState::Ready(asset) = &item.asset {
            ledger.set(Namespace::Asset, item.id, asset.digest());
        }
        if let Some(document) = &item.document {
            ledger.set(Namespace::Document, item.id, document.digest());
        }
    }
    ledger
}
