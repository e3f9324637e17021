//! Index records and data block headers.
//!
//! ```text
//! .idx  : [data_offset:i64][length:i32][timestamp:i64]  (20 bytes, big-endian)
//! .data : [length:i32][message bytes]                   (repeated)
//! ```

/// Size of one index record.
pub const RECORD_LEN: usize = 20;

/// Size of a data block's length header.
pub const BLOCK_HEADER_LEN: usize = 4;

/// Locates one archived message inside a window's data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    /// Offset of the block header in the data file.
    pub data_offset: i64,
    /// Length of the message bytes, excluding the header.
    pub length: i32,
    /// Epoch millis the message is indexed under.
    pub timestamp: i64,
}

impl IndexRecord {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[0..8].copy_from_slice(&self.data_offset.to_be_bytes());
        out[8..12].copy_from_slice(&self.length.to_be_bytes());
        out[12..20].copy_from_slice(&self.timestamp.to_be_bytes());
        out
    }

    /// Parse one record; `None` if `bytes` is not exactly one record long.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != RECORD_LEN {
            return None;
        }
        Some(Self {
            data_offset: i64::from_be_bytes(bytes[0..8].try_into().ok()?),
            length: i32::from_be_bytes(bytes[8..12].try_into().ok()?),
            timestamp: i64::from_be_bytes(bytes[12..20].try_into().ok()?),
        })
    }

    /// Structurally valid: positive length at a non-negative offset.
    #[must_use]
    pub fn is_plausible(&self) -> bool {
        self.data_offset >= 0 && self.length > 0
    }
}

/// Block header for `len` message bytes.
#[must_use]
pub fn block_header(len: i32) -> [u8; BLOCK_HEADER_LEN] {
    len.to_be_bytes()
}

/// Decode a block's length header; malformed input yields 0.
#[must_use]
pub fn get_data_size(header: &[u8]) -> usize {
    let Some(raw) = header.get(..BLOCK_HEADER_LEN) else {
        return 0;
    };
    let mut buf = [0u8; BLOCK_HEADER_LEN];
    buf.copy_from_slice(raw);
    usize::try_from(i32::from_be_bytes(buf)).unwrap_or(0)
}
