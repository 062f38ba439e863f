//! Seams between the driver, the remote store and the dataset.

use async_trait::async_trait;

use crate::api::{ApiError, WikiClient};

use super::types::{AssetPayload, DocumentPayload, SyncItem, WriteOutcome};

/// Media type of the published ledger carrier.
pub const CARRIER_MIME: &str = "image/png";

/// The remote document store.
///
/// Writes are create-or-update: the same call serves "new" and "changed"
/// items.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upload `asset`; `description` is the page text of a first upload.
    async fn upload_asset(
        &self,
        asset: &AssetPayload,
        description: Option<&str>,
    ) -> Result<WriteOutcome, ApiError>;

    async fn put_document(&self, document: &DocumentPayload) -> Result<WriteOutcome, ApiError>;

    /// Lowercase hex SHA-1 of the published ledger carrier, or `None` if none
    /// was published.
    async fn ledger_checksum(&self, name: &str) -> Result<Option<String>, ApiError>;

    /// Bytes of the published ledger carrier, or `None` if none was published.
    async fn fetch_ledger(&self, name: &str) -> Result<Option<Vec<u8>>, ApiError>;

    async fn publish_ledger(&self, name: &str, bytes: &[u8]) -> Result<WriteOutcome, ApiError>;
}

/// A source of items, consumed one at a time.
#[async_trait]
pub trait ItemFeed: Send {
    /// Remaining items, if known.
    fn size_hint(&self) -> Option<usize> {
        None
    }

    async fn next_item(&mut self) -> Option<SyncItem>;
}

#[async_trait]
impl ItemFeed for std::vec::IntoIter<SyncItem> {
    fn size_hint(&self) -> Option<usize> {
        Some(self.len())
    }

    async fn next_item(&mut self) -> Option<SyncItem> {
        self.next()
    }
}

#[async_trait]
impl RemoteStore for WikiClient {
    async fn upload_asset(
        &self,
        asset: &AssetPayload,
        description: Option<&str>,
    ) -> Result<WriteOutcome, ApiError> {
        self.upload_file(&asset.file_name, &asset.bytes, &asset.mime, description)
            .await
    }

    async fn put_document(&self, document: &DocumentPayload) -> Result<WriteOutcome, ApiError> {
        self.edit_page(&document.title, &document.text).await
    }

    async fn ledger_checksum(&self, name: &str) -> Result<Option<String>, ApiError> {
        Ok(self.file_info(name).await?.map(|info| info.sha1))
    }

    async fn fetch_ledger(&self, name: &str) -> Result<Option<Vec<u8>>, ApiError> {
        match self.file_info(name).await? {
            Some(info) => Ok(Some(self.download(&info).await?)),
            None => Ok(None),
        }
    }

    async fn publish_ledger(&self, name: &str, bytes: &[u8]) -> Result<WriteOutcome, ApiError> {
        self.upload_file(name, bytes, CARRIER_MIME, None).await
    }
}
