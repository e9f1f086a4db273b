//! # Engine - StrataKV Storage Engine
//!
//! The central orchestrator that ties together the [`memtable`], [`wal`] and
//! [`sstable`] crates into a leveled LSM-tree key-value store for one typed
//! column of keys and values.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                   ENGINE                      │
//! │                                               │
//! │ write.rs → WAL append → Memtable insert       │
//! │              |                                │
//! │              |  (threshold reached?)          │
//! │              |            yes                 │
//! │              v                                │
//! │      flush → new level-0 SST → WAL truncate   │
//! │                                               │
//! │ compaction.rs (background, every tick):       │
//! │      level i has >= growth_factor files       │
//! │          → merge level i into level i+1       │
//! │                                               │
//! │ read.rs → Memtable → cache → level 0..N       │
//! │            (newest file first, first hit wins)│
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                  |
//! |----------------|----------------------------------------------------------|
//! | `lib.rs`       | `Engine` struct, `open`, `close`, accessors, `Debug`, `Drop` |
//! | [`levels`]     | Level set, file naming, orphan cleanup, merge guards     |
//! | `manifest`     | Persisted level membership and order                     |
//! | `compaction`   | Level merge, install, worker pool and scheduler          |
//! | `cache`        | LRU cache of records read from disk                      |
//! | `recovery`     | WAL replay at open                                       |
//! | `write`        | `insert`, `delete`, `flush`, `clear`                     |
//! | `read`         | `get`, `has`, `may_have_key`                             |
//! | `stats`        | [`EngineStats`], `validate`                              |
//!
//! ## Crash Safety
//!
//! Every write is appended to the WAL **before** the memtable update. The WAL
//! is only truncated **after** the flushed SSTable is durable and registered.
//! SSTables are written to a temp file and renamed; merge outputs only replace
//! their sources once fully written, and leftovers are removed at open. The
//! `MANIFEST` is rewritten before any level change becomes visible, so a
//! restart sees the same files in the same order.

mod cache;
mod compaction;
pub mod levels;
mod manifest;
mod read;
mod recovery;
mod stats;
mod write;

use anyhow::{Context, Result};
use config::StoreConfig;
use memtable::Memtable;
use record::RecordCodec;
use std::sync::{Arc, Mutex};
use tracing::info;
use wal::Wal;

use cache::RecordCache;
use compaction::{CompactionPolicy, Compactor};
use levels::LevelManager;

pub use compaction::MERGE_BATCH;
pub use manifest::MANIFEST_FILENAME;
pub use stats::EngineStats;

/// A leveled LSM store over one directory.
///
/// # Write Path
///
/// 1. Issue a strictly increasing timestamp.
/// 2. Append the record to the WAL.
/// 3. Insert it into the memtable.
/// 4. If the memtable reached its threshold, write it to a new level-0
///    SSTable, register it, then truncate the WAL.
///
/// # Read Path
///
/// 1. Memtable (pending writes first), tombstones included.
/// 2. Read cache of records previously found on disk.
/// 3. Levels 0..N, newest file first, each checked through its bloom filter
///    and sparse index.
///
/// # Background
///
/// Unless `compaction_interval` is zero, a scheduler thread merges any level
/// holding `growth_factor` or more files into the next one on a pool of
/// `compaction_threads` workers. [`close`](Engine::close) stops it.
pub struct Engine {
    pub(crate) config: StoreConfig,
    pub(crate) codec: RecordCodec,
    pub(crate) mem: Memtable,
    pub(crate) wal: Wal,
    pub(crate) levels: Arc<LevelManager>,
    pub(crate) cache: Mutex<RecordCache>,
    pub(crate) policy: CompactionPolicy,
    /// Last timestamp handed out.
    pub(crate) last_ts: u64,
    compactor: Option<Compactor>,
    closed: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dir", &self.config.dir)
            .field("key_type", &self.codec.key_type())
            .field("value_type", &self.codec.value_type())
            .field("memtable_len", &self.mem.len())
            .field("pending_len", &self.mem.pending_len())
            .field("levels", &self.levels)
            .field("background", &self.compactor.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Engine {
    /// Opens the store described by `config`, recovering whatever is on disk.
    ///
    /// # Steps
    ///
    /// 1. Validate the config and create `<dir>` and every `level-<i>`.
    /// 2. Remove leftovers of interrupted writes and reopen every SSTable.
    /// 3. Open the WAL and replay it into the memtable.
    /// 4. Start background compaction unless the interval is zero.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.dir)
            .with_context(|| format!("creating {}", config.dir.display()))?;

        let codec = RecordCodec::new(config.key_type, config.value_type);
        let levels = Arc::new(LevelManager::load(&config)?);
        let wal = Wal::open(config.wal_path(), codec, config.wal_sync)
            .with_context(|| format!("opening WAL {}", config.wal_path().display()))?;

        let mut engine = Self {
            mem: Memtable::new(config.memtable_threshold),
            cache: Mutex::new(RecordCache::new(config.cache_capacity)),
            policy: CompactionPolicy::new(&config),
            last_ts: 0,
            compactor: None,
            closed: false,
            codec,
            wal,
            levels,
            config,
        };
        engine.recover()?;

        if !engine.config.compaction_interval.is_zero() {
            engine.compactor = Some(Compactor::start(Arc::clone(&engine.levels), &engine.config)?);
        }

        let files = engine.levels.file_counts()?;
        info!(
            dir = %engine.config.dir.display(),
            memtable = engine.mem.len(),
            files = ?files,
            "opened store"
        );
        Ok(engine)
    }

    /// Stops background compaction, flushes the memtable and syncs the WAL.
    ///
    /// Idempotent. Any later operation fails.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(mut compactor) = self.compactor.take() {
            compactor.stop()?;
        }
        if !self.mem.is_empty() {
            self.flush_memtable()?;
        }
        self.wal.sync()?;
        info!(dir = %self.config.dir.display(), "closed store");
        Ok(())
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        anyhow::ensure!(!self.closed, "store {} is closed", self.config.dir.display());
        Ok(())
    }

    /// Next write timestamp: wall-clock microseconds, forced strictly above
    /// the previous one.
    pub(crate) fn next_timestamp(&mut self) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        self.last_ts = now.max(self.last_ts + 1);
        self.last_ts
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> RecordCodec {
        self.codec
    }

    /// The on-disk level set.
    #[must_use]
    pub fn levels(&self) -> &LevelManager {
        &self.levels
    }

    /// Compacts `level` into the next level on the calling thread.
    ///
    /// Fails if a background merge of the same level is in flight.
    pub fn compact_level(&mut self, level: usize) -> Result<()> {
        self.ensure_open()?;
        anyhow::ensure!(
            level < self.levels.level_count(),
            "no level {} (store has {})",
            level,
            self.levels.level_count()
        );
        let guard = self
            .levels
            .try_guard(level)
            .ok_or_else(|| anyhow::anyhow!("level {} is already being merged", level))?;
        if let Some(outcome) = compaction::merge_level(&self.levels, level, self.policy)? {
            compaction::install(&self.levels, outcome)?;
        }
        drop(guard);
        Ok(())
    }

    /// Compacts every level holding `growth_factor` or more files, from
    /// level 0 down.
    pub fn compact(&mut self) -> Result<()> {
        self.ensure_open()?;
        for level in 0..self.levels.level_count() {
            if self.policy.needs_merge(&self.levels, level)? {
                self.compact_level(level)?;
            }
        }
        Ok(())
    }
}

/// Best-effort close on drop.
///
/// Errors are ignored because Drop cannot propagate them; anything not yet
/// flushed is still in the WAL and is replayed on the next open.
impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests;
