//! Error types for wiki API operations.

use thiserror::Error;

use crate::http::HttpError;
use crate::scheduler::SchedulerError;

/// Error code for an expired or invalid CSRF token.
pub const BAD_TOKEN: &str = "badtoken";

/// Error code for an upload whose bytes match the current file revision.
pub const FILE_UNCHANGED: &str = "fileexists-no-change";

/// Errors that can occur when talking to the wiki.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The token was rejected, refreshed, and rejected again.
    #[error("authorization expired: {action} rejected the token after a refresh")]
    AuthorizationExpired { action: String },

    /// API returned an error payload.
    #[error("API error '{code}': {info}")]
    Remote { code: String, info: String },

    /// API returned a non-error payload whose result is not `Success`.
    #[error("{action} not accepted: {detail}")]
    Rejected { action: String, detail: String },

    /// HTTP request failed.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Non-success HTTP status.
    #[error("HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    /// JSON parsing failed.
    #[error("could not decode API response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Downloaded bytes do not match the advertised SHA-1.
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// The scheduled call never completed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Login was refused.
    #[error("login failed: {0}")]
    LoginFailed(String),

    /// Invalid configuration.
    #[error("invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// Machine-readable API error code, if the server sent one.
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Remote { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether the server rejected the CSRF token.
    pub fn is_bad_token(&self) -> bool {
        self.code() == Some(BAD_TOKEN)
    }

    /// Transport failures and server-side 5xx/429 statuses. API error codes
    /// are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Http(_) => true,
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Extract a short, single-line error message for progress output.
pub fn short_error_message(err: &ApiError) -> String {
    let message = match err {
        ApiError::Remote { code, info } if info.is_empty() => code.clone(),
        ApiError::Remote { code, info } => format!("{code}: {info}"),
        other => other.to_string(),
    };
    match message.lines().next() {
        Some(first) if first.len() > 120 => {
            format!("{}...", first.chars().take(117).collect::<String>())
        }
        Some(first) => first.to_string(),
        None => message,
    }
}
