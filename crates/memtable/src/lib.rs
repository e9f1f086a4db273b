//! # Memtable
//!
//! The in-memory write buffer that sits in front of level 0.
//!
//! Records are kept in a `BTreeMap` keyed by the typed key, so
//! [`Memtable::flush`] hands back a key-sorted run that the SSTable writer can
//! persist as-is.
//!
//! ## Lock and pending queue
//!
//! ```text
//!            insert ──► map ──(len >= threshold)──► locked ──flush()──► unlocked
//!                                                     │                   ▲
//!  insert while locked ──► pending queue ─────────────┴── seeds new map ──┘
//! ```
//!
//! Crossing the threshold locks the memtable and is reported to the caller as
//! [`InsertOutcome::FlushRequired`]. Until the caller runs `flush()`, writes
//! are parked in a pending queue that stays visible to `get`/`has`, and then
//! seeds the fresh map.

use record::{Record, Value};
use std::collections::BTreeMap;

/// What happened to an inserted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored in the live map.
    Applied,
    /// Stored in the live map, which has now reached its threshold and is
    /// locked; the caller must [`flush`](Memtable::flush).
    FlushRequired,
    /// The memtable was locked; the record waits in the pending queue.
    Queued,
}

#[derive(Debug)]
pub struct Memtable {
    map: BTreeMap<Value, Record>,
    pending: Vec<Record>,
    locked: bool,
    threshold: usize,
}

impl Memtable {
    /// Creates an empty memtable that asks for a flush at `threshold` records.
    pub fn new(threshold: usize) -> Self {
        Self {
            map: BTreeMap::new(),
            pending: Vec::new(),
            locked: false,
            threshold: threshold.max(1),
        }
    }

    /// Inserts `record`, replacing any entry with the same key.
    ///
    /// The latest insert wins regardless of timestamps; callers issue
    /// timestamps in order.
    pub fn insert(&mut self, record: Record) -> InsertOutcome {
        if self.locked {
            self.pending.push(record);
            return InsertOutcome::Queued;
        }
        self.map.insert(record.key.clone(), record);
        if self.map.len() >= self.threshold {
            self.locked = true;
            InsertOutcome::FlushRequired
        } else {
            InsertOutcome::Applied
        }
    }

    /// The latest record for `key`, tombstones included. Queued writes are
    /// newer than the live map and are checked first.
    pub fn get(&self, key: &Value) -> Option<&Record> {
        self.pending
            .iter()
            .rev()
            .find(|r| &r.key == key)
            .or_else(|| self.map.get(key))
    }

    /// `true` if the live map or the pending queue holds a record for `key`.
    pub fn has(&self, key: &Value) -> bool {
        self.map.contains_key(key) || self.pending.iter().any(|r| &r.key == key)
    }

    /// Swaps in a fresh map seeded from the pending queue, unlocks, and returns
    /// the previous contents in ascending key order.
    ///
    /// If the queued writes alone reach the threshold the new map is locked
    /// again immediately.
    pub fn flush(&mut self) -> Vec<Record> {
        let mut next = BTreeMap::new();
        for r in self.pending.drain(..) {
            next.insert(r.key.clone(), r);
        }
        let previous = std::mem::replace(&mut self.map, next);
        self.locked = self.map.len() >= self.threshold;
        previous.into_values().collect()
    }

    /// Drops every record, queued ones included, and unlocks.
    pub fn clear(&mut self) {
        self.map.clear();
        self.pending.clear();
        self.locked = false;
    }

    /// Ordered iterator over the live map.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Record)> {
        self.map.iter()
    }

    /// Records in the live map.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty() && self.pending.is_empty()
    }

    /// Records waiting in the pending queue.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}
