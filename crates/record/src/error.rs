use std::io;

use thiserror::Error;

use crate::DataType;

/// Errors produced while encoding or decoding records.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Delimiter, length field or checksum did not match at `offset`.
    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    /// A value does not belong to the type the store was configured with.
    #[error("type mismatch: expected {expected}, got {actual:?}")]
    TypeMismatch { expected: DataType, actual: String },

    /// Unknown type name or tag.
    #[error("invalid data type: {0}")]
    InvalidType(String),

    /// An underlying I/O error from a buffer write.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        CodecError::CorruptRecord {
            offset,
            reason: reason.into(),
        }
    }
}
