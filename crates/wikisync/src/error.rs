//! Crate-level error type.

use thiserror::Error;

use crate::api::ApiError;
use crate::carrier::CarrierError;
use crate::ledger::{LedgerError, Namespace};
use crate::scheduler::SchedulerError;
use crate::source::SourceError;

/// Errors that end a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Carrier(#[from] CarrierError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Fetching the published ledger failed.
    #[error("could not load ledger '{file}': {source}")]
    LoadLedger {
        file: String,
        #[source]
        source: ApiError,
    },

    /// Writing one item failed.
    #[error("could not write {namespace} {id}: {source}")]
    Write {
        id: u32,
        namespace: Namespace,
        #[source]
        source: ApiError,
    },

    /// Publishing the ledger failed after retries.
    #[error("could not publish ledger '{file}': {source}")]
    Checkpoint {
        file: String,
        #[source]
        source: ApiError,
    },
}

impl SyncError {
    /// The underlying API error, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            SyncError::Api(e)
            | SyncError::LoadLedger { source: e, .. }
            | SyncError::Write { source: e, .. }
            | SyncError::Checkpoint { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

/// Result alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_names_item_and_namespace() {
        let err = SyncError::Write {
            id: 7,
            namespace: Namespace::Document,
            source: ApiError::Remote {
                code: "protectedpage".into(),
                info: "protected".into(),
            },
        };
        assert_eq!(
            err.to_string(),
            "could not write document 7: API error 'protectedpage': protected"
        );
        assert_eq!(err.api_error().and_then(ApiError::code), Some("protectedpage"));
    }

    #[test]
    fn ledger_errors_convert() {
        let err: SyncError = LedgerError::CorruptLedger {
            namespace: Namespace::Asset,
            len: 21,
        }
        .into();
        assert!(matches!(err, SyncError::Ledger(_)));
        assert!(err.api_error().is_none());
    }
}
