//! Compaction: merges every file of a level into the next level.
//!
//! A merge snapshots the source level, streams all of its files through a
//! [`MergeIterator`] (newest timestamp wins) and writes the result into fresh
//! tables in the destination level, rolling over to a new file every
//! `memtable_threshold * growth_factor` records. The last level merges into
//! itself.
//!
//! A winning tombstone is dropped unless a file at or below the destination
//! level, other than the merge's own inputs, may still hold the key by its
//! bloom filter. In that case the tombstone is written to the destination so
//! it keeps shadowing the older copy until a later merge meets both.
//!
//! Nothing is visible until [`install`] swaps sources for outputs under the
//! level lock; a failed merge deletes its partial outputs and leaves the
//! sources untouched.
//!
//! ## Background work
//!
//! ```text
//!                   tick (compaction_interval)
//!                              │
//!   ┌──────────────────────────▼───────────────────────┐
//!   │ scheduler: for each level over threshold whose    │
//!   │ guard is free, send MergeTask ──────────────┐     │
//!   │                                             │     │
//!   │ install(MergeResult) ◄── result channel ◄──┐│     │
//!   └────────────────────────────────────────────┼┼─────┘
//!                                                │▼ bounded task channel
//!                                     worker 0..compaction_threads
//! ```
//!
//! The per-level [`MergeGuard`] travels with the task and its result, so a
//! level is released only after its outcome is installed or discarded.

use anyhow::{Context, Result};
use config::StoreConfig;
use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use record::Record;
use sstable::{MergeIterator, SstReader, SstWriter};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::levels::{LevelManager, MergeGuard};

/// Records buffered between the merge and the output writer.
pub const MERGE_BATCH: usize = 10_000;

/// What a finished merge produced, waiting to be installed.
pub(crate) struct MergeOutcome {
    pub src: usize,
    pub dst: usize,
    pub epoch: u64,
    pub sources: Vec<Arc<SstReader>>,
    pub outputs: Vec<Arc<SstReader>>,
}

/// Planning knobs taken from the store config.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompactionPolicy {
    pub growth_factor: usize,
    pub max_records_per_file: usize,
}

impl CompactionPolicy {
    pub fn new(cfg: &StoreConfig) -> Self {
        Self {
            growth_factor: cfg.growth_factor,
            max_records_per_file: cfg.max_records_per_file().max(1),
        }
    }

    /// `true` if `level` holds at least `growth_factor` files.
    ///
    /// The last level only qualifies when merging it would actually produce
    /// fewer files.
    pub fn needs_merge(&self, levels: &LevelManager, level: usize) -> Result<bool> {
        let files = levels.level(level)?;
        if files.len() < self.growth_factor {
            return Ok(false);
        }
        if level + 1 < levels.level_count() {
            return Ok(true);
        }
        let records: u64 = files.iter().map(|f| f.len()).sum();
        let per_file = self.max_records_per_file as u64;
        let outputs = (records + per_file - 1) / per_file;
        Ok(outputs < files.len() as u64)
    }
}

/// Merges every file currently in `level` into new tables of the next level.
///
/// Returns `None` when the level is empty. The caller must hold the level's
/// [`MergeGuard`].
pub(crate) fn merge_level(
    levels: &LevelManager,
    level: usize,
    policy: CompactionPolicy,
) -> Result<Option<MergeOutcome>> {
    let epoch = levels.epoch();
    let sources = levels.level(level)?;
    if sources.is_empty() {
        return Ok(None);
    }
    let dst = (level + 1).min(levels.level_count() - 1);
    let input: u64 = sources.iter().map(|s| s.len()).sum();
    info!(level, dst, files = sources.len(), records = input, "merging level");

    let older = levels.files_from(dst, &sources)?;
    let mut sink = OutputSink::new(levels, dst, policy.max_records_per_file);
    let written = match drain_into(&sources, &older, &mut sink) {
        Ok(()) => sink.finish(),
        Err(e) => {
            sink.abandon();
            return Err(e);
        }
    };
    let paths = written?;

    let mut outputs = Vec::with_capacity(paths.len());
    for path in &paths {
        match SstReader::open(path, levels.codec(), levels.options()) {
            Ok(r) => outputs.push(Arc::new(r)),
            Err(e) => {
                discard(&paths);
                return Err(e.context(format!("reopening merge output {}", path.display())));
            }
        }
    }

    debug!(level, outputs = outputs.len(), "merge finished");
    Ok(Some(MergeOutcome {
        src: level,
        dst,
        epoch,
        sources,
        outputs,
    }))
}

/// Streams the merged sources into `sink`. Tombstones survive only while
/// one of `older` may still hold their key.
fn drain_into(
    sources: &[Arc<SstReader>],
    older: &[Arc<SstReader>],
    sink: &mut OutputSink<'_>,
) -> Result<()> {
    let cursors = sources
        .iter()
        .map(|s| s.cursor())
        .collect::<Result<Vec<_>>>()?;
    for record in MergeIterator::new(cursors).keep_tombstones() {
        let record = record?;
        if record.tombstone && !older.iter().any(|f| f.may_have_key(&record.key)) {
            continue;
        }
        sink.push(record)?;
    }
    Ok(())
}

/// Swaps a finished merge into the level set and unlinks its sources.
/// Returns `false` if the store was cleared while the merge ran; the outputs
/// are deleted in that case.
pub(crate) fn install(levels: &LevelManager, outcome: MergeOutcome) -> Result<bool> {
    let MergeOutcome {
        src,
        dst,
        epoch,
        sources,
        outputs,
    } = outcome;
    let produced = outputs.len();

    if !levels.replace(epoch, src, &sources, dst, outputs.clone())? {
        warn!(level = src, "store cleared during merge, discarding output");
        for out in &outputs {
            out.unlink()?;
        }
        return Ok(false);
    }

    for sst in &sources {
        if let Err(e) = sst.unlink() {
            warn!(path = %sst.path().display(), error = %e, "failed to unlink merged sstable");
        }
    }
    info!(level = src, dst, removed = sources.len(), added = produced, "installed merge");
    Ok(true)
}

fn discard(paths: &[PathBuf]) {
    for path in paths {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(sstable::index_path(path));
        let _ = std::fs::remove_file(sstable::bloom_path(path));
    }
}

/// Batches merged records into destination tables, rolling over at
/// `max_records` per file.
struct OutputSink<'a> {
    levels: &'a LevelManager,
    level: usize,
    max_records: usize,
    writer: Option<SstWriter>,
    batch: Vec<Record>,
    finished: Vec<PathBuf>,
}

impl<'a> OutputSink<'a> {
    fn new(levels: &'a LevelManager, level: usize, max_records: usize) -> Self {
        Self {
            levels,
            level,
            max_records,
            writer: None,
            batch: Vec::with_capacity(MERGE_BATCH.min(max_records)),
            finished: Vec::new(),
        }
    }

    fn push(&mut self, record: Record) -> Result<()> {
        self.batch.push(record);
        let in_file = self.writer.as_ref().map_or(0, SstWriter::len) + self.batch.len();
        if in_file >= self.max_records {
            self.roll()?;
        } else if self.batch.len() >= MERGE_BATCH {
            self.spill()?;
        }
        Ok(())
    }

    /// Writes the buffered batch to the current file, starting one if needed.
    fn spill(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        if self.writer.is_none() {
            let path = self.levels.next_path(self.level);
            self.writer = Some(SstWriter::create(
                &path,
                self.levels.codec(),
                self.levels.options(),
            )?);
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.stage(&self.batch)?;
        }
        self.batch.clear();
        Ok(())
    }

    /// Spills and closes the current file.
    fn roll(&mut self) -> Result<()> {
        self.spill()?;
        if let Some(w) = self.writer.take() {
            let path = w.path().to_path_buf();
            self.finished
                .push(w.finish().with_context(|| format!("finishing {}", path.display()))?);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<PathBuf>> {
        if let Err(e) = self.roll() {
            self.abandon();
            return Err(e);
        }
        Ok(std::mem::take(&mut self.finished))
    }

    fn abandon(mut self) {
        if let Some(w) = self.writer.take() {
            w.abandon();
        }
        discard(&self.finished);
    }
}

/// A merge handed to a worker. Owns the level's guard.
struct MergeTask {
    guard: MergeGuard,
}

/// A worker's answer, carrying the guard back for release after install.
struct MergeResult {
    guard: MergeGuard,
    outcome: Result<Option<MergeOutcome>>,
}

/// Background compaction: a scheduler thread plus a pool of merge workers.
pub(crate) struct Compactor {
    shutdown: Sender<()>,
    scheduler: Option<JoinHandle<()>>,
}

impl Compactor {
    pub fn start(levels: Arc<LevelManager>, cfg: &StoreConfig) -> Result<Self> {
        let policy = CompactionPolicy::new(cfg);
        let threads = cfg.compaction_threads.max(1);
        let (task_tx, task_rx) = bounded::<MergeTask>(threads);
        let (result_tx, result_rx) = unbounded::<MergeResult>();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = task_rx.clone();
            let tx = result_tx.clone();
            let levels = Arc::clone(&levels);
            let handle = thread::Builder::new()
                .name(format!("compaction-{}", i))
                .spawn(move || run_worker(&levels, policy, rx, tx))
                .context("spawning compaction worker")?;
            workers.push(handle);
        }
        drop(result_tx);

        let interval = cfg.compaction_interval;
        let scheduler = thread::Builder::new()
            .name("compaction-scheduler".to_string())
            .spawn(move || {
                run_scheduler(
                    &levels,
                    policy,
                    interval,
                    task_tx,
                    result_rx,
                    shutdown_rx,
                    workers,
                )
            })
            .context("spawning compaction scheduler")?;

        info!(threads, interval_ms = interval.as_millis() as u64, "compaction started");
        Ok(Self {
            shutdown: shutdown_tx,
            scheduler: Some(scheduler),
        })
    }

    /// Signals shutdown and waits for in-flight merges to be installed.
    pub fn stop(&mut self) -> Result<()> {
        let _ = self.shutdown.try_send(());
        if let Some(handle) = self.scheduler.take() {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("compaction scheduler panicked"))?;
        }
        Ok(())
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn run_worker(
    levels: &LevelManager,
    policy: CompactionPolicy,
    tasks: Receiver<MergeTask>,
    results: Sender<MergeResult>,
) {
    for task in tasks.iter() {
        let outcome = merge_level(levels, task.guard.level(), policy);
        if results
            .send(MergeResult {
                guard: task.guard,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }
}

fn run_scheduler(
    levels: &Arc<LevelManager>,
    policy: CompactionPolicy,
    interval: Duration,
    tasks: Sender<MergeTask>,
    results: Receiver<MergeResult>,
    shutdown: Receiver<()>,
    workers: Vec<JoinHandle<()>>,
) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(ticker) -> _ => dispatch(levels, policy, &tasks),
            recv(results) -> msg => match msg {
                Ok(result) => handle_result(levels, result),
                Err(_) => break,
            },
        }
    }

    // Closing the task channel lets idle workers exit; busy ones finish their
    // merge first and those results are still installed.
    drop(tasks);
    for w in workers {
        if w.join().is_err() {
            error!("compaction worker panicked");
        }
    }
    for result in results.try_iter() {
        handle_result(levels, result);
    }
    debug!("compaction scheduler stopped");
}

/// Queues a merge for every level over threshold whose guard is free.
fn dispatch(levels: &Arc<LevelManager>, policy: CompactionPolicy, tasks: &Sender<MergeTask>) {
    for level in 0..levels.level_count() {
        match policy.needs_merge(levels, level) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                error!(level, error = %e, "compaction planning failed");
                continue;
            }
        }
        let guard = match levels.try_guard(level) {
            Some(g) => g,
            None => continue,
        };
        // A full queue drops the task and its guard; the next tick retries.
        if tasks.try_send(MergeTask { guard }).is_err() {
            debug!(level, "compaction queue full");
        }
    }
}

fn handle_result(levels: &LevelManager, result: MergeResult) {
    let MergeResult { guard, outcome } = result;
    match outcome {
        Ok(Some(outcome)) => {
            if let Err(e) = install(levels, outcome) {
                error!(level = guard.level(), error = %e, "installing merge failed");
            }
        }
        Ok(None) => {}
        Err(e) => error!(level = guard.level(), error = %e, "merge failed"),
    }
    drop(guard);
}
