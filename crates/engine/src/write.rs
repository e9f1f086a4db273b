//! Write path: `insert()`, `delete()`, `flush()`, `clear()`.
//!
//! All mutations flow through this module. Each write is first appended to the
//! WAL, then applied to the memtable. When the memtable reaches its threshold
//! it is written to a new level-0 SSTable on the same call.

use anyhow::Result;
use memtable::InsertOutcome;
use record::{Record, Value};
use tracing::{debug, warn};
use wal::WalOp;

use crate::Engine;

impl Engine {
    /// Inserts or overwrites `key`.
    ///
    /// Key and value must match the store's types; strings longer than the
    /// declared width are truncated.
    pub fn insert(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        self.ensure_open()?;
        let ts = self.next_timestamp();
        let record = self.codec.record(key, value, ts)?;
        self.apply(record, WalOp::Insert)
    }

    /// Deletes `key` by writing a tombstone.
    ///
    /// Returns `false`, writing nothing, when neither the memtable nor any
    /// bloom filter can hold the key.
    pub fn delete(&mut self, key: impl Into<Value>) -> Result<bool> {
        self.ensure_open()?;
        let key = self.codec.key(key)?;
        if !self.may_have_key(key.clone())? {
            return Ok(false);
        }
        let ts = self.next_timestamp();
        let record = self.codec.tombstone(key, ts)?;
        self.apply(record, WalOp::Delete)?;
        Ok(true)
    }

    fn apply(&mut self, record: Record, op: WalOp) -> Result<()> {
        self.wal.append(&record, op)?;
        self.invalidate(&record.key);

        match self.mem.insert(record) {
            InsertOutcome::Applied => {}
            InsertOutcome::FlushRequired | InsertOutcome::Queued => self.flush_memtable()?,
        }
        Ok(())
    }

    fn invalidate(&self, key: &Value) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.invalidate(key);
        }
    }

    /// Writes the memtable to level 0 even if it is below its threshold.
    /// No-op when empty.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.mem.is_empty() {
            return Ok(());
        }
        self.flush_memtable()
    }

    /// Persists the live map as a level-0 table, then truncates the WAL.
    ///
    /// # Steps
    ///
    /// 1. Write a copy of the live map to a new SSTable and register it. On
    ///    failure the memtable stays locked and keeps every record, so later
    ///    writes queue and the next write retries.
    /// 2. Swap the map for one seeded from the pending queue.
    /// 3. Truncate the WAL, then re-log whatever the new map was seeded with
    ///    so it stays recoverable.
    pub(crate) fn flush_memtable(&mut self) -> Result<()> {
        let records: Vec<Record> = self.mem.iter().map(|(_, r)| r.clone()).collect();
        if !records.is_empty() {
            if let Err(e) = self.levels.flush_to_disk(&records) {
                warn!(error = %e, records = records.len(), "memtable flush failed");
                return Err(e);
            }
        }
        self.mem.flush();

        self.wal.truncate()?;
        let carried: Vec<Record> = self.mem.iter().map(|(_, r)| r.clone()).collect();
        for record in &carried {
            let op = if record.tombstone {
                WalOp::Delete
            } else {
                WalOp::Insert
            };
            self.wal.append(record, op)?;
        }
        debug!(flushed = records.len(), carried = carried.len(), "memtable flushed");

        if self.mem.is_locked() {
            return self.flush_memtable();
        }
        Ok(())
    }

    /// Removes every record: memtable, cache, WAL and all SSTables.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.mem.clear();
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
        self.wal.truncate()?;
        self.levels.clear()
    }
}
