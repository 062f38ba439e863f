//! PNG chunk framing.
//!
//! Only the container structure is handled here: signature, chunk length,
//! chunk type and CRC. Chunk payloads are opaque except for `tEXt`.

use super::CarrierError;

/// The eight-byte PNG file signature.
pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Largest chunk payload the format allows (2^31 - 1).
const MAX_CHUNK_LEN: usize = 0x7fff_ffff;

/// Longest permitted `tEXt` keyword.
const MAX_KEYWORD_LEN: usize = 79;

/// Four-letter chunk type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkType(pub [u8; 4]);

impl ChunkType {
    pub const IHDR: ChunkType = ChunkType(*b"IHDR");
    pub const IDAT: ChunkType = ChunkType(*b"IDAT");
    pub const IEND: ChunkType = ChunkType(*b"IEND");
    pub const TEXT: ChunkType = ChunkType(*b"tEXt");

    fn is_valid(&self) -> bool {
        self.0.iter().all(u8::is_ascii_alphabetic)
    }
}

impl std::fmt::Debug for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One framed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_type: ChunkType,
    pub data: Vec<u8>,
}

/// CRC-32 over chunk type and payload, as stored in the chunk trailer.
pub fn chunk_crc(chunk_type: ChunkType, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&chunk_type.0);
    hasher.update(data);
    hasher.finalize()
}

fn invalid(offset: usize, reason: impl Into<String>) -> CarrierError {
    CarrierError::InvalidFormat {
        offset,
        reason: reason.into(),
    }
}

fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
}

/// Split a PNG byte stream into chunks, validating the framing.
///
/// The stream must start with the signature and `IHDR`, end with exactly one
/// `IEND`, and carry a correct CRC on every chunk.
pub fn decode(bytes: &[u8]) -> Result<Vec<Chunk>, CarrierError> {
    if bytes.len() < SIGNATURE.len() || bytes[..SIGNATURE.len()] != SIGNATURE {
        return Err(invalid(0, "missing PNG signature"));
    }

    let mut chunks = Vec::new();
    let mut pos = SIGNATURE.len();

    loop {
        if bytes.len() - pos < 12 {
            return Err(invalid(pos, "truncated chunk header"));
        }

        let len = read_u32(bytes, pos) as usize;
        if len > MAX_CHUNK_LEN {
            return Err(invalid(pos, format!("chunk length {len} exceeds limit")));
        }

        let chunk_type = ChunkType([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]);
        if !chunk_type.is_valid() {
            return Err(invalid(pos + 4, "chunk type is not four ASCII letters"));
        }

        let data_start = pos + 8;
        let Some(crc_start) = data_start.checked_add(len) else {
            return Err(invalid(pos, "chunk length overflows"));
        };
        if crc_start + 4 > bytes.len() {
            return Err(invalid(pos, format!("{chunk_type} chunk extends past end of data")));
        }

        let data = &bytes[data_start..crc_start];
        let stored = read_u32(bytes, crc_start);
        let actual = chunk_crc(chunk_type, data);
        if stored != actual {
            return Err(invalid(
                pos,
                format!("{chunk_type} CRC mismatch: stored {stored:08x}, computed {actual:08x}"),
            ));
        }

        if chunks.is_empty() && chunk_type != ChunkType::IHDR {
            return Err(invalid(pos, format!("first chunk is {chunk_type}, expected IHDR")));
        }

        chunks.push(Chunk {
            chunk_type,
            data: data.to_vec(),
        });
        pos = crc_start + 4;

        if chunk_type == ChunkType::IEND {
            if pos != bytes.len() {
                return Err(invalid(pos, "trailing bytes after IEND"));
            }
            return Ok(chunks);
        }
    }
}

/// Serialize chunks into a PNG byte stream.
pub fn encode(chunks: &[Chunk]) -> Vec<u8> {
    let body: usize = chunks.iter().map(|c| c.data.len() + 12).sum();
    let mut out = Vec::with_capacity(SIGNATURE.len() + body);
    out.extend_from_slice(&SIGNATURE);
    for chunk in chunks {
        out.extend_from_slice(&(chunk.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&chunk.chunk_type.0);
        out.extend_from_slice(&chunk.data);
        out.extend_from_slice(&chunk_crc(chunk.chunk_type, &chunk.data).to_be_bytes());
    }
    out
}

/// Build a `tEXt` payload: Latin-1 keyword, NUL, Latin-1 text.
pub fn encode_text(keyword: &str, text: &str) -> Result<Vec<u8>, CarrierError> {
    let keyword_bytes = to_latin1(keyword).filter(|k| {
        !k.is_empty() && k.len() <= MAX_KEYWORD_LEN && !k.contains(&0)
    });
    let Some(keyword_bytes) = keyword_bytes else {
        return Err(CarrierError::InvalidPayload {
            keyword: keyword.to_string(),
            reason: "keyword must be 1-79 Latin-1 characters without NUL".to_string(),
        });
    };
    let Some(text_bytes) = to_latin1(text) else {
        return Err(CarrierError::InvalidPayload {
            keyword: keyword.to_string(),
            reason: "text is not representable in Latin-1".to_string(),
        });
    };

    let mut data = Vec::with_capacity(keyword_bytes.len() + 1 + text_bytes.len());
    data.extend_from_slice(&keyword_bytes);
    data.push(0);
    data.extend_from_slice(&text_bytes);
    Ok(data)
}

/// Split a `tEXt` payload into keyword and text. Returns `None` if there is
/// no NUL separator.
pub fn decode_text(data: &[u8]) -> Option<(String, String)> {
    let nul = data.iter().position(|b| *b == 0)?;
    let keyword = data[..nul].iter().map(|b| char::from(*b)).collect();
    let text = data[nul + 1..].iter().map(|b| char::from(*b)).collect();
    Some((keyword, text))
}

fn to_latin1(s: &str) -> Option<Vec<u8>> {
    s.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect()
}
