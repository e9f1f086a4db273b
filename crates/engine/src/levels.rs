//! Level manager: the on-disk half of the tree.
//!
//! Each level is a list of SSTable readers ordered oldest first. Level 0 takes
//! memtable flushes; level `i + 1` takes the output of merging level `i`.
//! Files inside a level may overlap, so lookups walk each level newest first
//! and the first hit (tombstones included) wins.
//!
//! Files live in `<dir>/level-<i>/<id>.sst`, where `id` comes from one
//! store-wide counter. Membership and order are persisted in the
//! [`manifest`](crate::manifest) on every change, before the change becomes
//! visible.

use anyhow::{Context, Result};
use config::StoreConfig;
use record::{Record, RecordCodec, Value};
use sstable::{SstOptions, SstReader, SstWriter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::manifest::{LevelNames, Manifest};

/// One level's files, oldest first.
pub type Level = Vec<Arc<SstReader>>;

pub struct LevelManager {
    dir: PathBuf,
    codec: RecordCodec,
    options: SstOptions,
    levels: RwLock<Vec<Level>>,
    manifest: Manifest,
    /// One flag per level; set while a merge of that level is in flight.
    merging: Vec<AtomicBool>,
    next_id: AtomicU64,
    /// Bumped by [`clear`](LevelManager::clear); merges started before a
    /// clear are discarded instead of installed.
    epoch: AtomicU64,
}

impl LevelManager {
    /// Opens every level directory under `cfg.dir`, creating missing ones.
    ///
    /// Leftovers of interrupted writes are removed first: `*.tmp` files and
    /// `.index` / `.bloom` companions whose `.sst` is gone. With a manifest,
    /// each level is loaded in manifest order and tables it does not list are
    /// deleted. Without one, tables are ordered by id and a manifest is
    /// written.
    pub fn load(cfg: &StoreConfig) -> Result<Self> {
        let codec = RecordCodec::new(cfg.key_type, cfg.value_type);
        let options = SstOptions::from(cfg);
        let manifest = Manifest::new(&cfg.dir);
        let listed = manifest.load(cfg.levels)?;
        let mut levels = Vec::with_capacity(cfg.levels);
        let mut max_id = 0u64;

        for level in 0..cfg.levels {
            let dir = cfg.level_dir(level);
            fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
            cleanup_orphans(&dir)?;

            let mut files: Vec<(u64, PathBuf)> = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().map(|e| e == "sst").unwrap_or(false) {
                    match file_id(&path) {
                        Some(id) => files.push((id, path)),
                        None => warn!(path = %path.display(), "ignoring sstable with a foreign name"),
                    }
                }
            }
            files.sort();
            if let Some((id, _)) = files.last() {
                max_id = max_id.max(*id);
            }

            let paths: Vec<PathBuf> = match &listed {
                Some(names) => {
                    let names = &names[level];
                    for (_, path) in &files {
                        let known = path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .map(|n| names.iter().any(|l| l == n))
                            .unwrap_or(false);
                        if !known {
                            warn!(path = %path.display(), "removing sstable missing from manifest");
                            remove_table(path)?;
                        }
                    }
                    names.iter().map(|n| dir.join(n)).collect()
                }
                None => files.into_iter().map(|(_, path)| path).collect(),
            };

            let mut readers = Vec::with_capacity(paths.len());
            for path in paths {
                let reader = SstReader::open(&path, codec, options)
                    .with_context(|| format!("loading level {} table {}", level, path.display()))?;
                readers.push(Arc::new(reader));
            }
            debug!(level, files = readers.len(), "loaded level");
            levels.push(readers);
        }

        if listed.is_none() {
            manifest.save(&names_of(&levels))?;
        }

        Ok(Self {
            dir: cfg.dir.clone(),
            codec,
            options,
            merging: (0..cfg.levels).map(|_| AtomicBool::new(false)).collect(),
            levels: RwLock::new(levels),
            manifest,
            next_id: AtomicU64::new(max_id + 1),
            epoch: AtomicU64::new(0),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Level>>> {
        self.levels
            .read()
            .map_err(|_| anyhow::anyhow!("level lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Level>>> {
        self.levels
            .write()
            .map_err(|_| anyhow::anyhow!("level lock poisoned"))
    }

    /// A consistent copy of every level's file list.
    pub fn snapshot(&self) -> Result<Vec<Level>> {
        Ok(self.read()?.clone())
    }

    /// The files of one level, oldest first.
    pub fn level(&self, level: usize) -> Result<Level> {
        Ok(self.read()?.get(level).cloned().unwrap_or_default())
    }

    /// Newest record for `key` across all levels, tombstones included.
    pub fn get(&self, key: &Value) -> Result<Option<Record>> {
        for level in self.snapshot()? {
            for sst in level.iter().rev() {
                if !sst.may_have_key(key) {
                    continue;
                }
                if let Some(record) = sst.read_key(key)? {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// Every file in `level` and deeper, except `exclude`.
    pub fn files_from(&self, level: usize, exclude: &[Arc<SstReader>]) -> Result<Level> {
        Ok(self
            .read()?
            .iter()
            .skip(level)
            .flatten()
            .filter(|f| !exclude.iter().any(|e| Arc::ptr_eq(e, f)))
            .cloned()
            .collect())
    }

    /// Bloom-only check across every file.
    pub fn may_have_key(&self, key: &Value) -> Result<bool> {
        Ok(self
            .read()?
            .iter()
            .flatten()
            .any(|sst| sst.may_have_key(key)))
    }

    /// A fresh path in `level`'s directory.
    pub fn next_path(&self, level: usize) -> PathBuf {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        config::level_dir(&self.dir, level).join(format!("{:010}.sst", id))
    }

    /// Writes a key-sorted run as a new level-0 table and registers it.
    pub fn flush_to_disk(&self, records: &[Record]) -> Result<Arc<SstReader>> {
        let path = self.next_path(0);
        let mut writer = SstWriter::create(&path, self.codec, self.options)?;
        if let Err(e) = writer.write(records) {
            writer.abandon();
            return Err(e);
        }
        let path = writer.finish()?;
        let reader = Arc::new(SstReader::open(&path, self.codec, self.options)?);
        self.register(0, Arc::clone(&reader))?;
        info!(path = %path.display(), records = records.len(), "flushed memtable to level 0");
        Ok(reader)
    }

    /// Adds `reader` as the newest file of `level`.
    pub fn register(&self, level: usize, reader: Arc<SstReader>) -> Result<()> {
        let mut levels = self.write()?;
        let mut next = levels.clone();
        next.get_mut(level)
            .ok_or_else(|| anyhow::anyhow!("no level {}", level))?
            .push(reader);
        self.manifest.save(&names_of(&next))?;
        *levels = next;
        Ok(())
    }

    /// Removes `sources` from `src` and adds `outputs` to `dst` under one
    /// write lock, so no reader sees both or neither.
    ///
    /// Outputs of a merge into a deeper level become its newest files. When a
    /// level merges into itself the outputs take the place of the sources at
    /// the old end, ahead of anything registered after the merge started.
    ///
    /// Returns `false` without touching anything if the store was cleared
    /// since `epoch` was read.
    pub fn replace(
        &self,
        epoch: u64,
        src: usize,
        sources: &[Arc<SstReader>],
        dst: usize,
        outputs: Vec<Arc<SstReader>>,
    ) -> Result<bool> {
        let mut levels = self.write()?;
        if self.epoch() != epoch {
            return Ok(false);
        }
        anyhow::ensure!(
            src < levels.len() && dst < levels.len(),
            "level out of range: {} -> {}",
            src,
            dst
        );
        let mut next = levels.clone();
        next[src].retain(|sst| !sources.iter().any(|s| Arc::ptr_eq(s, sst)));
        if src == dst {
            let newer = std::mem::take(&mut next[dst]);
            next[dst] = outputs.into_iter().chain(newer).collect();
        } else {
            next[dst].extend(outputs);
        }
        self.manifest.save(&names_of(&next))?;
        *levels = next;
        Ok(true)
    }

    /// Unlinks every file and empties every level.
    pub fn clear(&self) -> Result<()> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let drained: Vec<Level> = {
            let mut levels = self.write()?;
            self.manifest.save(&vec![Vec::new(); levels.len()])?;
            levels.iter_mut().map(std::mem::take).collect()
        };
        for sst in drained.iter().flatten() {
            sst.unlink()?;
        }
        info!(dir = %self.dir.display(), "cleared all levels");
        Ok(())
    }

    /// Files per level.
    pub fn file_counts(&self) -> Result<Vec<usize>> {
        Ok(self.read()?.iter().map(Vec::len).collect())
    }

    /// Records per level, counting every stored version and tombstone.
    pub fn record_counts(&self) -> Result<Vec<u64>> {
        Ok(self
            .read()?
            .iter()
            .map(|l| l.iter().map(|s| s.len()).sum())
            .collect())
    }

    pub fn level_count(&self) -> usize {
        self.merging.len()
    }

    pub fn codec(&self) -> RecordCodec {
        self.codec
    }

    pub fn options(&self) -> SstOptions {
        self.options
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Claims the merge flag of `level`; `None` if a merge is already running.
    pub(crate) fn try_guard(self: &Arc<Self>, level: usize) -> Option<MergeGuard> {
        let flag = self.merging.get(level)?;
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(MergeGuard {
            levels: Arc::clone(self),
            level,
        })
    }

    /// `true` while a merge of `level` is in flight.
    pub fn is_merging(&self, level: usize) -> bool {
        self.merging
            .get(level)
            .map(|f| f.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for LevelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelManager")
            .field("dir", &self.dir)
            .field("file_counts", &self.file_counts().unwrap_or_default())
            .finish()
    }
}

/// Exclusive right to merge one level. Releases the level when dropped.
pub(crate) struct MergeGuard {
    levels: Arc<LevelManager>,
    level: usize,
}

impl MergeGuard {
    pub(crate) fn level(&self) -> usize {
        self.level
    }
}

impl Drop for MergeGuard {
    fn drop(&mut self) {
        if let Some(flag) = self.levels.merging.get(self.level) {
            flag.store(false, Ordering::Release);
        }
    }
}

fn names_of(levels: &[Level]) -> LevelNames {
    levels
        .iter()
        .map(|level| {
            level
                .iter()
                .filter_map(|sst| sst.path().file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect()
        })
        .collect()
}

/// Deletes an unlisted table and its companions.
fn remove_table(path: &Path) -> Result<()> {
    fs::remove_file(path).with_context(|| format!("removing {}", path.display()))?;
    for companion in [sstable::index_path(path), sstable::bloom_path(path)] {
        match fs::remove_file(&companion) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("removing {}", companion.display()))
            }
        }
    }
    Ok(())
}

/// Parses the numeric stem of `<id>.sst`.
fn file_id(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

fn cleanup_orphans(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        let orphan = if name.ends_with(".tmp") {
            true
        } else if name.ends_with(".index") || name.ends_with(".bloom") {
            !path.with_extension("sst").exists()
        } else {
            false
        };
        if orphan {
            debug!(path = %path.display(), "removing leftover file");
            fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
        }
    }
    Ok(())
}
