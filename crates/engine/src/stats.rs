//! Store statistics and integrity checks.

use anyhow::Result;
use tracing::info;

use crate::Engine;

/// Point-in-time counters for one store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineStats {
    /// SSTables per level, level 0 first.
    pub level_file_counts: Vec<usize>,
    /// Stored records per level, shadowed versions and tombstones included.
    pub level_record_counts: Vec<u64>,
    /// WAL bytes, header and unflushed buffer included.
    pub wal_size: u64,
    pub memtable_len: usize,
    pub pending_len: usize,
    pub cache_len: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl EngineStats {
    /// SSTables across all levels.
    #[must_use]
    pub fn total_files(&self) -> usize {
        self.level_file_counts.iter().sum()
    }
}

impl Engine {
    pub fn stats(&self) -> Result<EngineStats> {
        let (cache_len, cache_hits, cache_misses) = match self.cache.lock() {
            Ok(c) => {
                let (hits, misses) = c.stats();
                (c.len(), hits, misses)
            }
            Err(_) => (0, 0, 0),
        };
        Ok(EngineStats {
            level_file_counts: self.levels.file_counts()?,
            level_record_counts: self.levels.record_counts()?,
            wal_size: self.wal.size()?,
            memtable_len: self.mem.len(),
            pending_len: self.mem.pending_len(),
            cache_len,
            cache_hits,
            cache_misses,
        })
    }

    /// Checks delimiters and checksum of every record in every SSTable.
    ///
    /// # Errors
    ///
    /// The first [`sstable::SstError::Corrupt`] found.
    pub fn validate(&self) -> Result<()> {
        self.ensure_open()?;
        let mut files = 0usize;
        for level in self.levels.snapshot()? {
            for sst in &level {
                sst.validate()?;
                files += 1;
            }
        }
        info!(files, "validated sstables");
        Ok(())
    }
}
