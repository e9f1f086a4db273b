//! Read cache for records found on disk.
//!
//! Least-recently-used eviction over a fixed number of entries. Recency is
//! tracked with a monotonically increasing tick per access; the oldest tick is
//! evicted first. Hits and misses are counted for stats.

use record::{Record, Value};
use std::collections::{BTreeMap, HashMap};

struct Entry {
    record: Record,
    tick: u64,
}

pub struct RecordCache {
    capacity: usize,
    entries: HashMap<Value, Entry>,
    /// tick -> key, oldest first.
    order: BTreeMap<u64, Value>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl RecordCache {
    /// A cache holding at most `capacity` records. Zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &Value) -> Option<Record> {
        let tick = self.next_tick();
        match self.entries.get_mut(key) {
            Some(entry) => {
                self.order.remove(&entry.tick);
                entry.tick = tick;
                self.order.insert(tick, key.clone());
                self.hits += 1;
                Some(entry.record.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, record: Record) {
        if self.capacity == 0 {
            return;
        }
        let tick = self.next_tick();
        let key = record.key.clone();
        if let Some(old) = self.entries.insert(key.clone(), Entry { record, tick }) {
            self.order.remove(&old.tick);
        }
        self.order.insert(tick, key);

        while self.entries.len() > self.capacity {
            match self.order.pop_first() {
                Some((_, oldest)) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Membership test that does not touch recency or counters.
    pub fn contains(&self, key: &Value) -> bool {
        self.entries.contains_key(key)
    }

    pub fn invalidate(&mut self, key: &Value) {
        if let Some(old) = self.entries.remove(key) {
            self.order.remove(&old.tick);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
