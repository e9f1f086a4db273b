use anyhow::{bail, ensure, Context, Result};
use bloom::BloomFilter;
use record::{Record, RecordCodec, Value, KEY_OFFSET};
use std::fs::{rename, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::format::{Header, DATA_OFFSET};
use crate::{bloom_path, index_path, sync_parent, tmp_path, write_atomic};
use crate::{SparseIndex, SstError, SstOptions};

/// Builds an SSTable and its `.index` / `.bloom` companions.
///
/// A new table is written to `<name>.sst.tmp` and only renamed into place by
/// [`finish`](SstWriter::finish), so a crash mid-write leaves nothing that
/// looks like a live table. Each [`write`](SstWriter::write) or
/// [`append`](SstWriter::append) call is flushed and fsynced before it
/// returns, and rewrites both companions: the sparse index is extended, the
/// bloom filter is rebuilt for the new key count.
///
/// [`stage`](SstWriter::stage) is the bulk path used by compaction: it writes
/// records without syncing or touching the companions, which are persisted
/// once by `finish`.
pub struct SstWriter {
    /// Final `.sst` path.
    path: PathBuf,
    /// Where data is currently written (`path` or its `.sst.tmp`).
    data_path: PathBuf,
    codec: RecordCodec,
    options: SstOptions,
    file: BufWriter<File>,
    index: SparseIndex,
    /// Encoded keys of every record back to back, kept to rebuild the bloom
    /// filter.
    keys: Vec<u8>,
    count: usize,
    /// Companions lag behind staged records.
    stale: bool,
    last_key: Option<Value>,
    /// Reusable encode buffer.
    buf: Vec<u8>,
}

impl SstWriter {
    /// Starts a new, empty table destined for `path`.
    pub fn create(path: &Path, codec: RecordCodec, options: SstOptions) -> Result<Self> {
        let data_path = tmp_path(path);
        let raw = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&data_path)
            .with_context(|| format!("creating {}", data_path.display()))?;
        let mut file = BufWriter::new(raw);
        Header::expected(&codec, &options).write_to(&mut file)?;

        Ok(Self {
            path: path.to_path_buf(),
            data_path,
            codec,
            options,
            file,
            index: SparseIndex::new(),
            keys: Vec::new(),
            count: 0,
            stale: false,
            last_key: None,
            buf: Vec::with_capacity(codec.record_len()),
        })
    }

    /// Reopens a finished table for [`append`](SstWriter::append).
    ///
    /// The header is validated, and the key list and sparse index are
    /// rebuilt by scanning the key field of every record.
    pub fn open(path: &Path, codec: RecordCodec, options: SstOptions) -> Result<Self> {
        let mut rdr = BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        );
        Header::read_from(&mut rdr)?.check(&Header::expected(&codec, &options), path)?;

        let size = rdr.get_ref().metadata()?.len();
        let rl = codec.record_len();
        if (size - DATA_OFFSET) % rl as u64 != 0 {
            return Err(SstError::Corrupt {
                path: path.to_path_buf(),
                offset: size,
                reason: "file does not end on a record boundary".to_string(),
            }
            .into());
        }

        let kw = codec.key_width();
        let count = (size - DATA_OFFSET) / rl as u64;
        let mut index = SparseIndex::new();
        let mut keys = Vec::with_capacity(count as usize * kw);
        let mut last_key = None;
        let mut slot = vec![0u8; rl];
        rdr.seek(SeekFrom::Start(DATA_OFFSET))?;
        for ordinal in 0..count {
            rdr.read_exact(&mut slot)?;
            let key = codec.decode_key(&slot)?;
            if ordinal % options.kv_per_page as u64 == 0 {
                index.insert(key.clone(), DATA_OFFSET + ordinal * rl as u64);
            }
            keys.extend_from_slice(&slot[KEY_OFFSET..KEY_OFFSET + kw]);
            last_key = Some(key);
        }

        let raw = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            data_path: path.to_path_buf(),
            codec,
            options,
            file: BufWriter::new(raw),
            index,
            keys,
            count: count as usize,
            stale: false,
            last_key,
            buf: Vec::with_capacity(rl),
        })
    }

    /// Writes the first sorted run of a new table.
    pub fn write(&mut self, records: &[Record]) -> Result<()> {
        ensure!(
            self.count == 0,
            "{} already holds {} records; use append",
            self.path.display(),
            self.count
        );
        self.extend(records)?;
        self.commit()
    }

    /// Extends the table with a sorted run whose first key sorts after the
    /// table's current last key.
    pub fn append(&mut self, records: &[Record]) -> Result<()> {
        self.extend(records)?;
        self.commit()
    }

    /// Adds a sorted run without syncing or rewriting the companions.
    /// Nothing staged is durable until [`finish`](SstWriter::finish).
    pub fn stage(&mut self, records: &[Record]) -> Result<()> {
        self.extend(records)?;
        self.stale = true;
        Ok(())
    }

    fn extend(&mut self, records: &[Record]) -> Result<()> {
        self.check_sorted(records)?;

        let rl = self.codec.record_len() as u64;
        let kw = self.codec.key_width();
        let page = self.options.kv_per_page as u64;
        for record in records {
            let ordinal = self.count as u64;
            if ordinal % page == 0 {
                self.index.insert(record.key.clone(), DATA_OFFSET + ordinal * rl);
            }
            self.buf.clear();
            self.codec.encode_into(record, &mut self.buf)?;
            self.file.write_all(&self.buf)?;
            self.keys.extend_from_slice(&self.buf[KEY_OFFSET..KEY_OFFSET + kw]);
            self.count += 1;
        }
        if let Some(last) = records.last() {
            self.last_key = Some(last.key.clone());
        }

        debug!(
            path = %self.path.display(),
            added = records.len(),
            total = self.count,
            "wrote sstable batch"
        );
        Ok(())
    }

    /// Syncs the data written so far and rewrites both companions.
    fn commit(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        self.persist_companions()?;
        self.stale = false;
        Ok(())
    }

    fn check_sorted(&self, records: &[Record]) -> Result<()> {
        let mut prev = self.last_key.as_ref();
        for record in records {
            if let Some(p) = prev {
                if p >= &record.key {
                    return Err(SstError::Unsorted {
                        path: self.path.clone(),
                        previous: p.to_string(),
                        next: record.key.to_string(),
                    }
                    .into());
                }
            }
            prev = Some(&record.key);
        }
        Ok(())
    }

    fn persist_companions(&self) -> Result<()> {
        write_atomic(&index_path(&self.path), |w| self.index.write_to(w))?;

        let bloom = BloomFilter::from_keys(
            self.keys.chunks(self.codec.key_width().max(1)),
            self.count,
            self.options.bloom_fpr,
        );
        write_atomic(&bloom_path(&self.path), |w| Ok(bloom.write_to(w)?))?;
        Ok(())
    }

    /// Syncs the data file, persists the companions if records were staged
    /// and, for a new table, renames it into place. Returns the final path.
    pub fn finish(mut self) -> Result<PathBuf> {
        if self.count == 0 {
            bail!("refusing to finish an empty SSTable {}", self.path.display());
        }
        if self.stale {
            self.persist_companions()?;
        }
        self.file.flush()?;
        self.file.get_ref().sync_all()?;

        if self.data_path != self.path {
            rename(&self.data_path, &self.path)?;
            sync_parent(&self.path);
        }
        Ok(self.path)
    }

    /// Deletes everything this writer produced: the data file and both
    /// companions.
    pub fn abandon(self) {
        let Self {
            path,
            data_path,
            file,
            ..
        } = self;
        drop(file.into_parts());
        let _ = std::fs::remove_file(&data_path);
        let _ = std::fs::remove_file(index_path(&path));
        let _ = std::fs::remove_file(bloom_path(&path));
    }

    /// Records written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn index(&self) -> &SparseIndex {
        &self.index
    }
}

impl std::fmt::Debug for SstWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SstWriter")
            .field("path", &self.path)
            .field("records", &self.count)
            .field("index_entries", &self.index.len())
            .finish()
    }
}
