//! Read path: `get()`, `has()`, `may_have_key()`.
//!
//! Point lookups check the memtable first (freshest data), then the record
//! cache, then every level from 0 down, newest file first. The first match
//! wins; a tombstone hides anything older and reads as "not found".

use anyhow::Result;
use record::{Record, Value};

use crate::Engine;

impl Engine {
    /// Looks up `key`, returning the live record if there is one.
    ///
    /// # Errors
    ///
    /// Fails if the key does not match the store's key type, or if an
    /// SSTable read fails (corruption, I/O).
    pub fn get(&self, key: impl Into<Value>) -> Result<Option<Record>> {
        self.ensure_open()?;
        let key = self.codec.key(key)?;

        // 1. memtable, tombstones included
        if let Some(record) = self.mem.get(&key) {
            return Ok(live(record.clone()));
        }

        // 2. cache
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(record) = cache.get(&key) {
                return Ok(live(record));
            }
        }

        // 3. levels, newest first
        match self.levels.get(&key)? {
            Some(record) => {
                if let Ok(mut cache) = self.cache.lock() {
                    cache.insert(record.clone());
                }
                Ok(live(record))
            }
            None => Ok(None),
        }
    }

    /// `true` if `key` currently has a live value.
    pub fn has(&self, key: impl Into<Value>) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Cheap membership hint: memtable, cache, then bloom filters only.
    ///
    /// `false` means the key is certainly absent; `true` may be a false
    /// positive, or a key whose latest write is a delete.
    pub fn may_have_key(&self, key: impl Into<Value>) -> Result<bool> {
        self.ensure_open()?;
        let key = self.codec.key(key)?;
        if self.mem.has(&key) {
            return Ok(true);
        }
        if let Ok(cache) = self.cache.lock() {
            if cache.contains(&key) {
                return Ok(true);
            }
        }
        self.levels.may_have_key(&key)
    }
}

fn live(record: Record) -> Option<Record> {
    if record.tombstone {
        None
    } else {
        Some(record)
    }
}
