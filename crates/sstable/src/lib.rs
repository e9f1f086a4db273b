//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk storage files for the StrataKV storage engine.
//!
//! When the memtable reaches its record threshold the engine flushes it to
//! a new level-0 SSTable. Compaction merges a whole level into new, larger
//! SSTables in the next level; that is the only time a file is extended
//! (via [`SstWriter::append`]).
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ HEADER (13 bytes)                                              │
//! │                                                               │
//! │ header_len=7 | "SSTT" | version | compression | encoding      │
//! │ meta_len=3 | value_tag | key_tag | record_len | '\n'          │
//! ├───────────────────────────────────────────────────────────────┤
//! │ DATA (fixed-length records, strictly ascending keys)          │
//! │                                                               │
//! │ "STAR" | key_len | val_len | crc_len | key | value | crc32    │
//! │ timestamp | tombstone | "ENDE"                                │
//! │                                                               │
//! │ ... repeated for each record ...                               │
//! └───────────────────────────────────────────────────────────────┘
//!
//!   <name>.index   key,offset,key,offset,...   (first key of every page)
//!   <name>.bloom   hash count \n bit,bit,...    (every key)
//! ```
//!
//! Because every record has the same length, record `n` lives at
//! `13 + n * record_len`. A point lookup takes the greatest indexed key not
//! above the target, reads that one page and binary-searches it.

mod error;
mod format;
mod index;
mod merge;
mod reader;
mod writer;

use config::{Compression, Encoding, StoreConfig};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub use error::SstError;
pub use format::{Header, DATA_OFFSET, SST_MAGIC, SST_VERSION};
pub use index::SparseIndex;
pub use merge::MergeIterator;
pub use reader::{RecordCursor, SstReader};
pub use writer::SstWriter;

/// Tuning shared by writers and readers of one store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SstOptions {
    /// Records per sparse-index page.
    pub kv_per_page: usize,
    /// Bloom filter target false positive rate.
    pub bloom_fpr: f64,
    /// Map files into memory for lookups.
    pub use_mmap: bool,
    /// Checksum every record when a reader is opened.
    pub validate_on_open: bool,
    pub compression: Compression,
    pub encoding: Encoding,
}

impl Default for SstOptions {
    fn default() -> Self {
        Self {
            kv_per_page: config::DEFAULT_KV_PER_PAGE,
            bloom_fpr: config::DEFAULT_BLOOM_FPR,
            use_mmap: true,
            validate_on_open: false,
            compression: Compression::None,
            encoding: Encoding::None,
        }
    }
}

impl From<&StoreConfig> for SstOptions {
    fn from(cfg: &StoreConfig) -> Self {
        Self {
            kv_per_page: cfg.kv_per_page,
            bloom_fpr: cfg.bloom_fpr,
            use_mmap: cfg.use_mmap,
            validate_on_open: cfg.validate_on_open,
            compression: cfg.compression,
            encoding: cfg.encoding,
        }
    }
}

/// `<name>.index` next to `<name>.sst`.
#[must_use]
pub fn index_path(sst: &Path) -> PathBuf {
    sst.with_extension("index")
}

/// `<name>.bloom` next to `<name>.sst`.
#[must_use]
pub fn bloom_path(sst: &Path) -> PathBuf {
    sst.with_extension("bloom")
}

/// `<name>.sst.tmp`, where a new file is written before it is renamed.
#[must_use]
pub fn tmp_path(sst: &Path) -> PathBuf {
    sst.with_extension("sst.tmp")
}

/// Writes `path` through a temp file + rename so readers never see a
/// half-written companion.
pub(crate) fn write_atomic<F>(path: &Path, fill: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> anyhow::Result<()>,
{
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut w = BufWriter::new(File::create(&tmp)?);
    fill(&mut w)?;
    w.flush()?;
    w.into_inner()?.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Fsyncs the parent directory so a rename survives a crash.
pub(crate) fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(test)]
mod tests;
