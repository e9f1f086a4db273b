use std::path::PathBuf;

use thiserror::Error;

/// Typed SSTable failures. Functions in this crate return `anyhow::Result`
/// and wrap these, so callers can `downcast_ref::<SstError>()`.
#[derive(Debug, Error)]
pub enum SstError {
    /// A header or metadata field does not match the store's configuration.
    #[error("cannot open {path}: {field} mismatch, expected {expected}, found {actual}")]
    Init {
        path: PathBuf,
        field: &'static str,
        expected: String,
        actual: String,
    },

    /// A record failed delimiter or checksum validation.
    #[error("corrupt record in {path} at offset {offset}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Input to `write`/`append` was not strictly ascending.
    #[error("records out of order for {path}: {previous} must sort before {next}")]
    Unsorted {
        path: PathBuf,
        previous: String,
        next: String,
    },

    /// The `.index` companion could not be parsed.
    #[error("bad sparse index {path}: {reason}")]
    Index { path: PathBuf, reason: String },

    /// The `.bloom` companion could not be parsed.
    #[error("bad bloom filter {path}: {reason}")]
    Bloom { path: PathBuf, reason: String },
}
