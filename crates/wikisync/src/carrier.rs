//! Ledger carrier: a PNG image that transports a [`HashLedger`] in `tEXt` chunks.
//!
//! Each ledger namespace is stored as one `tEXt` chunk keyed by
//! [`Namespace::keyword`], whose text is the base64 of the packed namespace.
//! Every other chunk of the image is kept byte-for-byte, so the carrier stays
//! a valid image and re-encoding is deterministic.
//!
//! # Example
//!
//! ```ignore
//! use wikisync::carrier::Carrier;
//!
//! let mut carrier = Carrier::load(&published_bytes)?;
//! let mut ledger = carrier.extract_ledger()?;
//! ledger.set(Namespace::Asset, 7, digest);
//! carrier.embed_ledger(&ledger);
//! let bytes = carrier.to_bytes();
//! ```

pub mod png;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use crate::ledger::{HashLedger, LedgerError, Namespace};

use self::png::{Chunk, ChunkType};

/// Errors raised while reading or writing a carrier.
#[derive(Debug, Error)]
pub enum CarrierError {
    /// The container framing is malformed.
    #[error("invalid carrier format at byte {offset}: {reason}")]
    InvalidFormat { offset: usize, reason: String },

    /// A metadata segment could not be encoded or decoded.
    #[error("invalid '{keyword}' metadata: {reason}")]
    InvalidPayload { keyword: String, reason: String },

    /// A decoded ledger payload is corrupt.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Decoded `tEXt` metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEntry {
    pub keyword: String,
    pub text: String,
}

/// One tagged unit of the carrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    chunk: Chunk,
}

impl Segment {
    /// Build a metadata segment.
    pub fn text(keyword: &str, text: &str) -> Result<Self, CarrierError> {
        Ok(Self {
            chunk: Chunk {
                chunk_type: ChunkType::TEXT,
                data: png::encode_text(keyword, text)?,
            },
        })
    }

    pub fn chunk_type(&self) -> ChunkType {
        self.chunk.chunk_type
    }

    pub fn data(&self) -> &[u8] {
        &self.chunk.data
    }

    /// Keyword and text, if this is a well-formed metadata segment.
    pub fn text_entry(&self) -> Option<TextEntry> {
        if self.chunk.chunk_type != ChunkType::TEXT {
            return None;
        }
        png::decode_text(&self.chunk.data).map(|(keyword, text)| TextEntry { keyword, text })
    }

    fn is_end(&self) -> bool {
        self.chunk.chunk_type == ChunkType::IEND
    }

    fn has_keyword(&self, keyword: &str) -> bool {
        self.text_entry().is_some_and(|entry| entry.keyword == keyword)
    }
}

/// An ordered sequence of segments whose last element is always `IEND`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Carrier {
    segments: Vec<Segment>,
}

impl Carrier {
    /// Parse carrier bytes, validating the container framing.
    pub fn load(bytes: &[u8]) -> Result<Self, CarrierError> {
        let segments = png::decode(bytes)?
            .into_iter()
            .map(|chunk| Segment { chunk })
            .collect();
        Ok(Self { segments })
    }

    /// A 1x1 grayscale image with no metadata, for stores that have never
    /// had a carrier published.
    pub fn blank() -> Self {
        let chunk = |chunk_type, data: &[u8]| Segment {
            chunk: Chunk {
                chunk_type,
                data: data.to_vec(),
            },
        };
        Self {
            segments: vec![
                chunk(ChunkType::IHDR, &[0, 0, 0, 1, 0, 0, 0, 1, 8, 0, 0, 0, 0]),
                // zlib stream of a single scanline: filter byte 0, one pixel 0.
                chunk(
                    ChunkType::IDAT,
                    &[0x78, 0x9c, 0x63, 0x60, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01],
                ),
                chunk(ChunkType::IEND, &[]),
            ],
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Text of the first metadata segment with `keyword`.
    pub fn text(&self, keyword: &str) -> Option<String> {
        self.segments
            .iter()
            .filter_map(Segment::text_entry)
            .find(|entry| entry.keyword == keyword)
            .map(|entry| entry.text)
    }

    /// Decode the ledger stored in this carrier.
    ///
    /// A missing namespace segment yields an empty namespace.
    pub fn extract_ledger(&self) -> Result<HashLedger, CarrierError> {
        let mut ledger = HashLedger::new();
        for namespace in Namespace::ALL {
            let keyword = namespace.keyword();
            let Some(text) = self.text(keyword) else {
                continue;
            };
            let packed = STANDARD
                .decode(text.trim())
                .map_err(|e| CarrierError::InvalidPayload {
                    keyword: keyword.to_string(),
                    reason: e.to_string(),
                })?;
            ledger.deserialize(namespace, &packed)?;
        }
        Ok(ledger)
    }

    /// Replace the ledger segments with the contents of `ledger`.
    ///
    /// Existing ledger segments are removed; a segment is written for each
    /// non-empty namespace directly before `IEND`. All other segments keep
    /// their bytes and relative order.
    pub fn embed_ledger(&mut self, ledger: &HashLedger) {
        self.segments.retain(|segment| {
            !Namespace::ALL
                .iter()
                .any(|namespace| segment.has_keyword(namespace.keyword()))
        });

        let end = self
            .segments
            .iter()
            .rposition(Segment::is_end)
            .unwrap_or(self.segments.len());

        let fresh: Vec<Segment> = Namespace::ALL
            .into_iter()
            .filter(|namespace| ledger.len(*namespace) > 0)
            .map(|namespace| {
                let text = STANDARD.encode(ledger.serialize(namespace));
                // Keywords are fixed ASCII and base64 is ASCII, so Latin-1
                // encoding cannot fail.
                Segment {
                    chunk: Chunk {
                        chunk_type: ChunkType::TEXT,
                        data: [namespace.keyword().as_bytes(), &[0], text.as_bytes()].concat(),
                    },
                }
            })
            .collect();

        self.segments.splice(end..end, fresh);
    }

    /// Serialize back into PNG bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let chunks: Vec<Chunk> = self.segments.iter().map(|s| s.chunk.clone()).collect();
        png::encode(&chunks)
    }
}
