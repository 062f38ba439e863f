//! Hash ledger: the record of what was last published, per namespace.
//!
//! A ledger maps a dataset item id to the MD5 digest of the content that was
//! last successfully written to the remote store. Two independent namespaces
//! exist: binary assets and text documents.
//!
//! # Packed format
//!
//! Each namespace packs to a flat run of 20-byte records, sorted by id:
//!
//! ```text
//! +----------------+------------------------+
//! | id (u32, LE)   | digest (16 bytes, MD5) |  ... repeated
//! +----------------+------------------------+
//! ```
//!
//! There is no header and no length prefix, so a packed namespace must be an
//! exact multiple of [`ENTRY_LEN`] bytes.

use std::collections::BTreeMap;
use std::fmt;

use md5::{Digest as _, Md5};
use thiserror::Error;

/// Length of a content digest in bytes.
pub const DIGEST_LEN: usize = 16;

/// Length of one packed ledger record (id + digest).
pub const ENTRY_LEN: usize = 4 + DIGEST_LEN;

/// Errors raised while decoding a packed ledger.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Packed bytes are not a whole number of records.
    #[error("corrupt {namespace} ledger: {len} bytes is not a multiple of the 20-byte record size")]
    CorruptLedger { namespace: Namespace, len: usize },

    /// A hex digest string could not be parsed.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}

/// The two independent ledger namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    /// Content hashes of uploaded binary assets (images).
    Asset,
    /// Content hashes of published text documents.
    Document,
}

impl Namespace {
    /// Both namespaces, in the order they are written to a carrier.
    pub const ALL: [Namespace; 2] = [Namespace::Document, Namespace::Asset];

    /// Keyword of the carrier metadata segment holding this namespace.
    ///
    /// These literals are part of the published format and must not change.
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Namespace::Asset => "image",
            Namespace::Document => "data",
        }
    }

    /// Look up a namespace by its carrier keyword.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "image" => Some(Namespace::Asset),
            "data" => Some(Namespace::Document),
            _ => None,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Asset => f.write_str("asset"),
            Namespace::Document => f.write_str("document"),
        }
    }
}

/// A 128-bit content fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Compute the MD5 digest of `content`.
    #[must_use]
    pub fn compute(content: &[u8]) -> Self {
        Self(Md5::digest(content).into())
    }

    /// Parse a 32-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, LedgerError> {
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| LedgerError::InvalidDigest(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Lowercase hex representation.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// In-memory id → digest mapping for both namespaces.
///
/// `BTreeMap` keeps ids sorted, which makes the packed output deterministic
/// regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashLedger {
    assets: BTreeMap<u32, Digest>,
    documents: BTreeMap<u32, Digest>,
}

impl HashLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, namespace: Namespace) -> &BTreeMap<u32, Digest> {
        match namespace {
            Namespace::Asset => &self.assets,
            Namespace::Document => &self.documents,
        }
    }

    fn map_mut(&mut self, namespace: Namespace) -> &mut BTreeMap<u32, Digest> {
        match namespace {
            Namespace::Asset => &mut self.assets,
            Namespace::Document => &mut self.documents,
        }
    }

    /// Last published digest for `id`, or `None` if it was never published.
    #[must_use]
    pub fn get(&self, namespace: Namespace, id: u32) -> Option<Digest> {
        self.map(namespace).get(&id).copied()
    }

    /// Record `digest` as the published content for `id`.
    ///
    /// Returns the previous digest, if any.
    pub fn set(&mut self, namespace: Namespace, id: u32, digest: Digest) -> Option<Digest> {
        self.map_mut(namespace).insert(id, digest)
    }

    /// Forget the entry for `id`.
    pub fn remove(&mut self, namespace: Namespace, id: u32) -> Option<Digest> {
        self.map_mut(namespace).remove(&id)
    }

    /// Number of entries in a namespace.
    #[must_use]
    pub fn len(&self, namespace: Namespace) -> usize {
        self.map(namespace).len()
    }

    /// True when both namespaces are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty() && self.documents.is_empty()
    }

    /// Entries of a namespace in ascending id order.
    pub fn iter(&self, namespace: Namespace) -> impl Iterator<Item = (u32, Digest)> + '_ {
        self.map(namespace).iter().map(|(id, digest)| (*id, *digest))
    }

    /// Pack a namespace into its binary record form.
    #[must_use]
    pub fn serialize(&self, namespace: Namespace) -> Vec<u8> {
        let map = self.map(namespace);
        let mut out = Vec::with_capacity(map.len() * ENTRY_LEN);
        for (id, digest) in map {
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(digest.as_bytes());
        }
        out
    }

    /// Replace the contents of a namespace with the records in `bytes`.
    ///
    /// On error the namespace is left untouched.
    pub fn deserialize(&mut self, namespace: Namespace, bytes: &[u8]) -> Result<(), LedgerError> {
        if bytes.len() % ENTRY_LEN != 0 {
            return Err(LedgerError::CorruptLedger {
                namespace,
                len: bytes.len(),
            });
        }

        let entries = bytes
            .chunks_exact(ENTRY_LEN)
            .map(|record| {
                let (id, digest) = record.split_at(4);
                let id = u32::from_le_bytes([id[0], id[1], id[2], id[3]]);
                let mut raw = [0u8; DIGEST_LEN];
                raw.copy_from_slice(digest);
                (id, Digest(raw))
            })
            .collect();

        *self.map_mut(namespace) = entries;
        Ok(())
    }
}
