//! # Record - typed, fixed-width record codec
//!
//! Every component of the StrataKV storage engine moves data around as
//! [`Record`]s: a typed key, a typed value, a write timestamp, a tombstone flag
//! and a CRC32 checksum over the encoded key+value bytes.
//!
//! A store fixes its key and value [`DataType`] at creation time, which makes
//! every encoded record the same length. SSTables rely on that to jump to the
//! n-th record with plain offset arithmetic.
//!
//! ## Storage form
//!
//! ```text
//! ┌──────────┬─────────┬─────────┬─────────┬─────┬───────┬──────────┬───────────┬───────────┬──────────┐
//! │ "STAR"   │ key_len │ val_len │ crc_len │ key │ value │ crc32    │ timestamp │ tombstone │ "ENDE"   │
//! │ 4 bytes  │ u32     │ u32     │ u32 (4) │ kw  │ vw    │ u32      │ u64       │ u8        │ 4 bytes  │
//! └──────────┴─────────┴─────────┴─────────┴─────┴───────┴──────────┴───────────┴───────────┴──────────┘
//! ```
//!
//! All integers are little-endian. The fixed part is [`BASE_BYTES`] (33) so a
//! record is `33 + key_width + value_width` bytes long.
//!
//! ## WAL form
//!
//! ```text
//! "WREC" | key_tag u8 | value_tag u8 | key_len u32 | val_len u32 | key | value | timestamp u64 | op u8 | "WEND"
//! ```
//!
//! The WAL form carries the type tags instead of a checksum; the checksum is
//! recomputed when the entry is decoded.
//!
//! ## Example
//!
//! ```rust
//! use record::{DataType, RecordCodec};
//!
//! let codec = RecordCodec::new(DataType::Str(16), DataType::U64);
//! let rec = codec.record("alice", 42u64, 1).unwrap();
//! let bytes = codec.encode(&rec).unwrap();
//! assert_eq!(bytes.len(), codec.record_len());
//! assert_eq!(codec.decode(&bytes, 0).unwrap(), rec);
//! ```

mod codec;
mod error;
mod types;

pub use codec::{
    Record, RecordCodec, BASE_BYTES, CHECKSUM_BYTES, END_DELIMITER, KEY_OFFSET, START_DELIMITER,
    WAL_END_DELIMITER, WAL_START_DELIMITER,
};
pub use error::CodecError;
pub use types::{DataType, Value};

/// Computes the record checksum (CRC32) over `bytes`.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Returns `true` if `bytes` hash to `expected`.
#[must_use]
pub fn validate_checksum(bytes: &[u8], expected: u32) -> bool {
    checksum(bytes) == expected
}
