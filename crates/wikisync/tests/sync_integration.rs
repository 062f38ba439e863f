//! Integration tests for sync runs against an in-memory store.
//!
//! Key scenarios tested:
//! - First run writes everything, a rerun with the same data writes nothing
//! - A rerun whose ledger matches the published checksum stops before loading
//! - Changed content is classified as changed and the ledger follows
//! - The published ledger survives in its carrier between runs
//! - A corrupt published ledger aborts the run before any write
//! - Runs never hang on checkpoint publication

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest as _, Sha1};
use wikisync::api::ApiError;
use wikisync::carrier::png::{Chunk, ChunkType, encode};
use wikisync::sync::{
    AssetPayload, AssetState, Classification, DocumentPayload, RemoteStore, SyncItem,
    SyncProgress, WriteOutcome,
};
use wikisync::{
    Carrier, CarrierError, Digest, LedgerError, Namespace, Shutdown, SyncDriver, SyncError,
    SyncOptions,
};

/// Maximum time a run should take in tests.
const RUN_TIMEOUT: Duration = Duration::from_secs(10);

const LEDGER_FILE: &str = "Profile-Icons-V1-lockfile.png";

/// Store shared between runs, recording every write.
#[derive(Clone, Default)]
struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    files: Vec<(String, Vec<u8>)>,
    pages: Vec<(String, String)>,
    ledger: Option<Vec<u8>>,
    publications: usize,
    downloads: usize,
}

impl MemoryStore {
    fn write_count(&self) -> usize {
        let state = self.inner.lock().unwrap();
        state.files.len() + state.pages.len()
    }

    fn clear_writes(&self) {
        let mut state = self.inner.lock().unwrap();
        state.files.clear();
        state.pages.clear();
    }

    fn publications(&self) -> usize {
        self.inner.lock().unwrap().publications
    }

    fn downloads(&self) -> usize {
        self.inner.lock().unwrap().downloads
    }

    fn set_ledger(&self, bytes: Vec<u8>) {
        self.inner.lock().unwrap().ledger = Some(bytes);
    }

    fn ledger_carrier(&self) -> Carrier {
        let bytes = self.inner.lock().unwrap().ledger.clone().unwrap();
        Carrier::load(&bytes).unwrap()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn upload_asset(
        &self,
        asset: &AssetPayload,
        _description: Option<&str>,
    ) -> Result<WriteOutcome, ApiError> {
        self.inner
            .lock()
            .unwrap()
            .files
            .push((asset.file_name.clone(), asset.bytes.clone()));
        Ok(WriteOutcome::Written)
    }

    async fn put_document(&self, document: &DocumentPayload) -> Result<WriteOutcome, ApiError> {
        self.inner
            .lock()
            .unwrap()
            .pages
            .push((document.title.clone(), document.text.clone()));
        Ok(WriteOutcome::Written)
    }

    async fn ledger_checksum(&self, _name: &str) -> Result<Option<String>, ApiError> {
        let state = self.inner.lock().unwrap();
        Ok(state.ledger.as_deref().map(|bytes| hex::encode(Sha1::digest(bytes))))
    }

    async fn fetch_ledger(&self, _name: &str) -> Result<Option<Vec<u8>>, ApiError> {
        let mut state = self.inner.lock().unwrap();
        state.downloads += 1;
        Ok(state.ledger.clone())
    }

    async fn publish_ledger(&self, _name: &str, bytes: &[u8]) -> Result<WriteOutcome, ApiError> {
        let mut state = self.inner.lock().unwrap();
        let unchanged = state.ledger.as_deref() == Some(bytes);
        state.ledger = Some(bytes.to_vec());
        state.publications += 1;
        Ok(if unchanged {
            WriteOutcome::Unchanged
        } else {
            WriteOutcome::Written
        })
    }
}

fn icon(id: u32, version: &str) -> SyncItem {
    let canonical = format!(r#"{{"id": {id},"title": "{version}"}}"#);
    SyncItem {
        id,
        asset: AssetState::Ready(AssetPayload {
            file_name: format!("Profile-Icons-V1-{id}.jpeg"),
            mime: "image/jpeg".to_string(),
            bytes: format!("jpeg {id} {version}").into_bytes(),
            description: None,
        }),
        document: Some(DocumentPayload {
            title: format!("Module:Profile-Icons/V1/icon/{id}"),
            text: format!("return {{\n    [\"id\"] = {id},\n    [\"title\"] = \"{version}\"\n}}"),
            canonical,
        }),
    }
}

fn options() -> SyncOptions {
    SyncOptions {
        ledger_file: LEDGER_FILE.to_string(),
        ..SyncOptions::default()
    }
}

async fn run(store: &MemoryStore, items: Vec<SyncItem>) -> Result<wikisync::SyncReport, SyncError> {
    let driver = SyncDriver::new(store.clone(), options());
    tokio::time::timeout(RUN_TIMEOUT, driver.run(items.into_iter(), None))
        .await
        .expect("sync run timed out")
}

#[tokio::test]
async fn rerun_with_same_data_writes_nothing() {
    let store = MemoryStore::default();

    let first = run(&store, vec![icon(7, "a")]).await.unwrap();
    assert_eq!(first.assets.new, 1);
    assert_eq!(first.documents.new, 1);
    assert_eq!(store.write_count(), 2);

    store.clear_writes();
    let second = run(&store, vec![icon(7, "a")]).await.unwrap();
    assert_eq!(second.assets.unchanged, 1);
    assert_eq!(second.documents.unchanged, 1);
    assert_eq!(second.assets.written() + second.documents.written(), 0);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn changed_content_updates_the_ledger() {
    let store = MemoryStore::default();
    run(&store, vec![icon(7, "a"), icon(8, "a")]).await.unwrap();

    let changed = icon(7, "b");
    let expected = changed.document.as_ref().unwrap().digest();

    store.clear_writes();
    let report = run(&store, vec![changed.clone(), icon(8, "a")])
        .await
        .unwrap();
    assert_eq!(report.documents.changed, 1);
    assert_eq!(report.documents.unchanged, 1);
    assert_eq!(report.assets.changed, 1);
    assert_eq!(store.write_count(), 2);

    let ledger = store.ledger_carrier().extract_ledger().unwrap();
    assert_eq!(ledger.get(Namespace::Document, 7), Some(expected));
    assert_eq!(ledger.len(Namespace::Document), 2);
}

#[tokio::test]
async fn classification_events_follow_the_ledger() {
    let store = MemoryStore::default();
    run(&store, vec![icon(1, "a")]).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: wikisync::sync::ProgressCallback = Box::new(move |event| {
        if let SyncProgress::ItemSynced {
            id,
            namespace,
            classification,
            ..
        } = event
        {
            sink.lock().unwrap().push((id, namespace, classification));
        }
    });

    SyncDriver::new(store.clone(), options())
        .run(vec![icon(1, "a"), icon(2, "a")].into_iter(), Some(&callback))
        .await
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (1, Namespace::Asset, Classification::Unchanged),
            (1, Namespace::Document, Classification::Unchanged),
            (2, Namespace::Asset, Classification::New),
            (2, Namespace::Document, Classification::New),
        ]
    );
}

#[tokio::test]
async fn unchanged_rerun_stops_at_the_checksum() {
    let store = MemoryStore::default();
    run(&store, vec![icon(1, "a"), icon(2, "a")]).await.unwrap();
    assert_eq!(store.publications(), 1);
    assert_eq!(store.downloads(), 1);

    store.clear_writes();
    let report = run(&store, vec![icon(1, "a"), icon(2, "a")]).await.unwrap();
    assert!(report.up_to_date);
    assert_eq!(report.processed, 2);
    assert_eq!(report.checkpoints, 0);
    assert_eq!(store.publications(), 1);
    assert_eq!(store.downloads(), 1);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn unchanged_rerun_without_precheck_still_publishes_final_checkpoint() {
    let store = MemoryStore::default();
    run(&store, vec![icon(1, "a")]).await.unwrap();
    assert_eq!(store.publications(), 1);

    let driver = SyncDriver::new(
        store.clone(),
        SyncOptions {
            precheck: false,
            ..options()
        },
    );
    let report = driver.run(vec![icon(1, "a")].into_iter(), None).await.unwrap();
    assert!(!report.up_to_date);
    assert_eq!(report.checkpoints, 1);
    assert_eq!(store.publications(), 2);
    assert_eq!(store.downloads(), 2);
}

#[tokio::test]
async fn partial_interrupted_run_is_not_up_to_date() {
    let store = MemoryStore::default();
    let shutdown = Shutdown::new();
    let stopper = shutdown.clone();
    let callback: wikisync::sync::ProgressCallback = Box::new(move |event| {
        if let SyncProgress::ItemProcessed { processed: 1, .. } = event {
            stopper.request();
        }
    });

    let report = SyncDriver::new(store.clone(), options())
        .with_shutdown(shutdown)
        .run(vec![icon(1, "a"), icon(2, "a")].into_iter(), Some(&callback))
        .await
        .unwrap();
    assert!(report.interrupted);

    // The published ledger holds item 1 only, so the full rerun must sync.
    let rerun = run(&store, vec![icon(1, "a"), icon(2, "a")]).await.unwrap();
    assert!(!rerun.up_to_date);
    assert_eq!(rerun.assets.unchanged, 1);
    assert_eq!(rerun.assets.new, 1);
}

#[tokio::test]
async fn carrier_keeps_unrelated_metadata_across_runs() {
    let store = MemoryStore::default();
    let template = encode(&[
        Chunk {
            chunk_type: ChunkType::IHDR,
            data: vec![0, 0, 0, 1, 0, 0, 0, 1, 8, 0, 0, 0, 0],
        },
        Chunk {
            chunk_type: ChunkType::TEXT,
            data: b"Comment\0keep me".to_vec(),
        },
        Chunk {
            chunk_type: ChunkType::IEND,
            data: vec![],
        },
    ]);

    SyncDriver::new(store.clone(), options())
        .with_carrier_template(Carrier::load(&template).unwrap())
        .run(vec![icon(3, "a")].into_iter(), None)
        .await
        .unwrap();

    let carrier = store.ledger_carrier();
    assert_eq!(carrier.text("Comment").as_deref(), Some("keep me"));
    assert!(carrier.text("image").is_some());
    assert!(carrier.text("data").is_some());
}

#[tokio::test]
async fn corrupt_ledger_payload_aborts_the_run() {
    let store = MemoryStore::default();
    let payload = STANDARD.encode([0u8; 21]);
    store.set_ledger(encode(&[
        Chunk {
            chunk_type: ChunkType::IHDR,
            data: vec![0, 0, 0, 1, 0, 0, 0, 1, 8, 0, 0, 0, 0],
        },
        Chunk {
            chunk_type: ChunkType::TEXT,
            data: [b"data\0".as_slice(), payload.as_bytes()].concat(),
        },
        Chunk {
            chunk_type: ChunkType::IEND,
            data: vec![],
        },
    ]));

    let err = run(&store, vec![icon(1, "a")]).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Carrier(CarrierError::Ledger(LedgerError::CorruptLedger {
            namespace: Namespace::Document,
            len: 21
        }))
    ));
    assert_eq!(store.write_count(), 0);
    assert_eq!(store.publications(), 0);
}

#[tokio::test]
async fn shutdown_before_start_processes_nothing() {
    let store = MemoryStore::default();
    let shutdown = Shutdown::new();
    shutdown.request();

    let report = SyncDriver::new(store.clone(), options())
        .with_shutdown(shutdown)
        .run(vec![icon(1, "a")].into_iter(), None)
        .await
        .unwrap();

    assert!(report.interrupted);
    assert_eq!(report.processed, 0);
    assert_eq!(store.write_count(), 0);
    assert_eq!(report.checkpoints, 1);
}

#[test]
fn digests_are_md5() {
    // MD5("") = d41d8cd98f00b204e9800998ecf8427e
    assert_eq!(
        Digest::compute(b"").to_hex(),
        "d41d8cd98f00b204e9800998ecf8427e"
    );
}
