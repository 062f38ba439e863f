//! Client for the wiki's MediaWiki action API.
//!
//! # Module Structure
//!
//! - [`error`] - `ApiError` and error-code helpers
//! - [`types`] - Response types and `FileInfo`
//! - [`form`] - url-encoded and multipart body encoders
//! - [`client`] - `WikiClient`: login, token cache, edit, upload, file lookup and download
//!
//! All traffic goes through a [`crate::scheduler::RequestScheduler`], so one
//! scheduler shared by every client keeps the whole process under the wiki's
//! request ceiling.

mod client;
pub mod error;
pub mod form;
pub mod types;

pub use client::{DEFAULT_SUMMARY, DEFAULT_USER_AGENT, WikiClient};
pub use error::{ApiError, BAD_TOKEN, FILE_UNCHANGED, short_error_message};
pub use types::{FileInfo, FileStatus};
