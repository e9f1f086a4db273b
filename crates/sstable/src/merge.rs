//! K-way merge over sorted record streams.
//!
//! Produces records in ascending key order. When the same key appears in
//! more than one source, only the record with the **highest timestamp** is
//! kept; on a timestamp tie the later source wins. A winning tombstone is
//! dropped from the output altogether unless the merge was built with
//! [`keep_tombstones`](MergeIterator::keep_tombstones), in which case the
//! caller decides whether an older copy elsewhere still needs shadowing.
//!
//! Sources are given oldest first, so for compaction that is the level's
//! file list in creation order.

use anyhow::Result;
use record::Record;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// The current head of one source.
struct HeapEntry {
    record: Record,
    /// Position of the source in the input list.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse the key comparison so the
        // smallest key pops first.
        other
            .record
            .key
            .cmp(&self.record.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges several sorted streams into one deduplicated stream.
///
/// Each source is an iterator of `Result<Record>` whose keys are strictly
/// ascending, typically a [`RecordCursor`](crate::RecordCursor). The merge is
/// lazy: at most one record per source is buffered. The first error from any
/// source is yielded and ends the iteration.
pub struct MergeIterator<I>
where
    I: Iterator<Item = Result<Record>>,
{
    sources: Vec<I>,
    heap: BinaryHeap<HeapEntry>,
    /// Error raised while priming the heap, reported on the first `next`.
    pending_err: Option<anyhow::Error>,
    /// Yield winning tombstones instead of skipping them.
    tombstones: bool,
    done: bool,
}

impl<I> MergeIterator<I>
where
    I: Iterator<Item = Result<Record>>,
{
    /// Creates a merge over `sources`, ordered oldest first.
    pub fn new(sources: Vec<I>) -> Self {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            pending_err: None,
            tombstones: false,
            done: false,
        };
        for source in 0..merge.sources.len() {
            if let Err(e) = merge.advance(source) {
                merge.pending_err = Some(e);
                break;
            }
        }
        merge
    }

    /// Yields winning tombstones too.
    #[must_use]
    pub fn keep_tombstones(mut self) -> Self {
        self.tombstones = true;
        self
    }

    /// Pulls the next record of `source` onto the heap.
    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some(item) = self.sources[source].next() {
            self.heap.push(HeapEntry {
                record: item?,
                source,
            });
        }
        Ok(())
    }

    /// Pops the smallest key and folds every other source's copy of it into
    /// a single winner.
    fn next_winner(&mut self) -> Result<Option<Record>> {
        let top = match self.heap.pop() {
            Some(e) => e,
            None => return Ok(None),
        };
        self.advance(top.source)?;

        let mut best = top.record;
        while let Some(peek) = self.heap.peek() {
            if peek.record.key != best.key {
                break;
            }
            let dup = match self.heap.pop() {
                Some(d) => d,
                None => break,
            };
            self.advance(dup.source)?;
            // Sources pop in ascending order on equal keys, so `>=` lets a
            // later source win a timestamp tie.
            if dup.record.timestamp >= best.timestamp {
                best = dup.record;
            }
        }
        Ok(Some(best))
    }
}

impl<I> Iterator for MergeIterator<I>
where
    I: Iterator<Item = Result<Record>>,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(e) = self.pending_err.take() {
            self.done = true;
            return Some(Err(e));
        }
        loop {
            match self.next_winner() {
                Ok(Some(r)) if r.tombstone && !self.tombstones => continue,
                Ok(Some(r)) => return Some(Ok(r)),
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
