//! # Config - store options
//!
//! [`StoreConfig`] carries every option the engine recognizes. It is built
//! with [`StoreConfig::new`] plus chained setters and checked once with
//! [`StoreConfig::validate`] when the engine opens.
//!
//! ```rust
//! use config::StoreConfig;
//! use record::DataType;
//! use std::time::Duration;
//!
//! let cfg = StoreConfig::new("/tmp/users", DataType::Str(32), DataType::U64)
//!     .memtable_threshold(50_000)
//!     .compaction_interval(Duration::from_secs(2));
//! cfg.validate().unwrap();
//! ```

use anyhow::{ensure, Result};
use record::DataType;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Records held by the memtable before it is flushed to level 0.
pub const DEFAULT_MEMTABLE_THRESHOLD: usize = 100_000;
/// Target bloom filter false positive rate.
pub const DEFAULT_BLOOM_FPR: f64 = 0.2;
/// Records per sparse-index page.
pub const DEFAULT_KV_PER_PAGE: usize = 1000;
/// Number of levels in the tree.
pub const DEFAULT_LEVELS: usize = 4;
/// File count at which a level is compacted into the next.
pub const DEFAULT_GROWTH_FACTOR: usize = 10;
/// How often the compaction scheduler looks for overflowing levels.
pub const DEFAULT_COMPACTION_INTERVAL: Duration = Duration::from_secs(10);
/// Entries kept by the read cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// SST compression flag (header byte 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Brotli,
    Zlib,
}

impl Compression {
    #[must_use]
    pub fn flag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
            Compression::Brotli => 2,
            Compression::Zlib => 3,
        }
    }

    #[must_use]
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(Compression::None),
            1 => Some(Compression::Gzip),
            2 => Some(Compression::Brotli),
            3 => Some(Compression::Zlib),
            _ => None,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// SST encoding flag (header byte 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    None,
    RunLength,
    Dict,
}

impl Encoding {
    #[must_use]
    pub fn flag(self) -> u8 {
        match self {
            Encoding::None => 0,
            Encoding::RunLength => 1,
            Encoding::Dict => 2,
        }
    }

    #[must_use]
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(Encoding::None),
            1 => Some(Encoding::RunLength),
            2 => Some(Encoding::Dict),
            _ => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Options for one store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory: holds `wal.log` and one `level-<i>` directory per level.
    pub dir: PathBuf,

    pub key_type: DataType,
    pub value_type: DataType,

    /// Memtable record count that triggers a flush (default: 100 000)
    pub memtable_threshold: usize,

    /// Bloom filter target false positive rate (default: 0.2)
    pub bloom_fpr: f64,

    /// Sparse index page size in records (default: 1000)
    pub kv_per_page: usize,

    /// Number of levels (default: 4)
    pub levels: usize,

    /// Files per level before it is merged into the next (default: 10)
    pub growth_factor: usize,

    /// Compaction worker threads (default: available parallelism, at most 4)
    pub compaction_threads: usize,

    /// Compaction check interval (default: 10s)
    pub compaction_interval: Duration,

    /// Read SSTs through a memory map (default: true)
    pub use_mmap: bool,

    /// fsync the WAL after every append (default: false)
    pub wal_sync: bool,

    /// Read cache entries; 0 disables the cache (default: 10 000)
    pub cache_capacity: usize,

    /// Checksum every record of every SST when it is opened (default: false)
    pub validate_on_open: bool,

    pub compression: Compression,
    pub encoding: Encoding,
}

impl StoreConfig {
    /// Creates a config with default tuning for the given directory and types.
    pub fn new(dir: impl Into<PathBuf>, key_type: DataType, value_type: DataType) -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(4);
        Self {
            dir: dir.into(),
            key_type,
            value_type,
            memtable_threshold: DEFAULT_MEMTABLE_THRESHOLD,
            bloom_fpr: DEFAULT_BLOOM_FPR,
            kv_per_page: DEFAULT_KV_PER_PAGE,
            levels: DEFAULT_LEVELS,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            compaction_threads: threads,
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
            use_mmap: true,
            wal_sync: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            validate_on_open: false,
            compression: Compression::None,
            encoding: Encoding::None,
        }
    }

    pub fn memtable_threshold(mut self, records: usize) -> Self {
        self.memtable_threshold = records;
        self
    }

    pub fn bloom_fpr(mut self, rate: f64) -> Self {
        self.bloom_fpr = rate;
        self
    }

    pub fn kv_per_page(mut self, records: usize) -> Self {
        self.kv_per_page = records;
        self
    }

    pub fn levels(mut self, levels: usize) -> Self {
        self.levels = levels;
        self
    }

    pub fn growth_factor(mut self, factor: usize) -> Self {
        self.growth_factor = factor;
        self
    }

    pub fn compaction_threads(mut self, threads: usize) -> Self {
        self.compaction_threads = threads;
        self
    }

    /// Set compaction check interval. `Duration::ZERO` disables the
    /// background scheduler; compaction then only runs when asked for.
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    pub fn use_mmap(mut self, enabled: bool) -> Self {
        self.use_mmap = enabled;
        self
    }

    pub fn wal_sync(mut self, enabled: bool) -> Self {
        self.wal_sync = enabled;
        self
    }

    pub fn cache_capacity(mut self, entries: usize) -> Self {
        self.cache_capacity = entries;
        self
    }

    pub fn validate_on_open(mut self, enabled: bool) -> Self {
        self.validate_on_open = enabled;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Path of the write-ahead log.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.dir.join("wal.log")
    }

    /// Directory holding the SSTs of `level`.
    #[must_use]
    pub fn level_dir(&self, level: usize) -> PathBuf {
        level_dir(&self.dir, level)
    }

    /// Records a compaction output file holds before a new one is started.
    #[must_use]
    pub fn max_records_per_file(&self) -> usize {
        self.memtable_threshold.saturating_mul(self.growth_factor)
    }

    /// Checks that every option is in range.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.key_type.byte_width() > 0 && self.value_type.byte_width() > 0,
            "key and value types must have a non-zero width"
        );
        ensure!(self.memtable_threshold > 0, "memtable_threshold must be > 0");
        ensure!(
            self.bloom_fpr > 0.0 && self.bloom_fpr < 1.0,
            "bloom_fpr must be in (0, 1), got {}",
            self.bloom_fpr
        );
        ensure!(self.kv_per_page > 0, "kv_per_page must be > 0");
        ensure!(self.levels > 0, "levels must be > 0");
        ensure!(self.growth_factor >= 2, "growth_factor must be >= 2");
        ensure!(self.compaction_threads > 0, "compaction_threads must be > 0");
        ensure!(
            self.compression == Compression::None && self.encoding == Encoding::None,
            "compression {} / encoding {} is not supported for writing",
            self.compression,
            self.encoding
        );
        Ok(())
    }
}

/// `<dir>/level-<level>`.
#[must_use]
pub fn level_dir(dir: &Path, level: usize) -> PathBuf {
    dir.join(format!("level-{}", level))
}

#[cfg(test)]
mod tests;
