use anyhow::{Context, Result};
use bloom::BloomFilter;
use memmap2::Mmap;
use record::{Record, RecordCodec, Value};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::format::{Header, DATA_OFFSET};
use crate::{bloom_path, index_path, SparseIndex, SstError, SstOptions};

/// Reads an SSTable for point lookups and full scans.
///
/// On [`open`](SstReader::open) the header is validated against the store's
/// codec and options, and the sparse index and bloom filter are loaded from
/// their companion files.
///
/// Page reads go through a read-only memory map when one is available. The
/// map is optional at every step: it is skipped when `use_mmap` is off,
/// dropped if mapping fails, rebuilt by [`remap`](SstReader::remap) and
/// released by [`unlink`](SstReader::unlink). Without it, pages are read with
/// a seek + read on a persistent file handle, wrapped in a `Mutex` so lookups
/// only need `&self`.
pub struct SstReader {
    path: PathBuf,
    codec: RecordCodec,
    options: SstOptions,
    file: Mutex<BufReader<File>>,
    mmap: RwLock<Option<Mmap>>,
    index: SparseIndex,
    bloom: BloomFilter,
    file_size: u64,
    count: u64,
}

impl SstReader {
    /// Opens the table at `path`.
    ///
    /// # Errors
    ///
    /// - [`SstError::Init`] if any header or metadata field differs from what
    ///   `codec` and `options` imply.
    /// - [`SstError::Corrupt`] if the data section is not a whole number of
    ///   records, or (with `validate_on_open`) if any record fails validation.
    /// - [`SstError::Index`] / [`SstError::Bloom`] for unreadable companions.
    pub fn open(path: &Path, codec: RecordCodec, options: SstOptions) -> Result<Self> {
        let path = path.to_path_buf();
        let mut f = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let file_size = f.metadata()?.len();

        let header = Header::read_from(&mut f).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                anyhow::Error::new(SstError::Init {
                    path: path.clone(),
                    field: "header",
                    expected: format!("{} bytes", DATA_OFFSET),
                    actual: format!("{} bytes", file_size),
                })
            } else {
                e.into()
            }
        })?;
        header.check(&Header::expected(&codec, &options), &path)?;

        let rl = codec.record_len() as u64;
        if (file_size - DATA_OFFSET) % rl != 0 {
            return Err(SstError::Corrupt {
                path,
                offset: file_size,
                reason: "file does not end on a record boundary".to_string(),
            }
            .into());
        }

        let (index, bloom) = load_companions(&path, &codec)?;
        f.seek(SeekFrom::Start(0))?;

        let reader = Self {
            mmap: RwLock::new(None),
            file: Mutex::new(BufReader::new(f)),
            count: (file_size - DATA_OFFSET) / rl,
            path,
            codec,
            options,
            index,
            bloom,
            file_size,
        };
        if options.use_mmap {
            reader.remap();
        }
        if options.validate_on_open {
            reader.validate()?;
        }
        debug!(path = %reader.path.display(), records = reader.count, "opened sstable");
        Ok(reader)
    }

    /// Rebuilds the memory map for the file's current contents. A failure is
    /// logged and leaves the reader on positional reads.
    pub fn remap(&self) {
        if !self.options.use_mmap {
            return;
        }
        let mapped = self
            .file
            .lock()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
            .and_then(|f| {
                // SAFETY: tables are never modified in place while mapped;
                // append only grows a file, and `refresh` remaps afterwards.
                unsafe { Mmap::map(f.get_ref()) }
            });
        let next = match mapped {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "mmap failed, using buffered reads");
                None
            }
        };
        if let Ok(mut slot) = self.mmap.write() {
            *slot = next;
        }
    }

    /// Picks up growth from [`SstWriter::append`](crate::SstWriter::append):
    /// re-reads size, sparse index and bloom filter, then remaps.
    pub fn refresh(&mut self) -> Result<()> {
        let size = fs::metadata(&self.path)?.len();
        let (index, bloom) = load_companions(&self.path, &self.codec)?;
        self.file_size = size;
        self.count = (size - DATA_OFFSET) / self.codec.record_len() as u64;
        self.index = index;
        self.bloom = bloom;
        self.remap();
        Ok(())
    }

    /// `true` if the map is currently live.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.mmap.read().map(|m| m.is_some()).unwrap_or(false)
    }

    /// Bloom filter test. No false negatives.
    #[must_use]
    pub fn may_have_key(&self, key: &Value) -> bool {
        self.codec
            .key_bytes(key)
            .map(|b| self.bloom.may_contain(&b))
            .unwrap_or(false)
    }

    /// Point lookup. Returns the stored record (possibly a tombstone) or
    /// `None` when the key is not in this table.
    ///
    /// Finds the greatest indexed key `<= key`, reads that page (at most
    /// `kv_per_page` records, clipped at end of file) and binary-searches it,
    /// decoding only the key field of each visited slot.
    pub fn read_key(&self, key: &Value) -> Result<Option<Record>> {
        let page_off = match self.index.floor(key) {
            Some((_, off)) => off,
            None => return Ok(None),
        };
        let rl = self.codec.record_len();
        let page_len = (self.options.kv_per_page as u64 * rl as u64).min(self.file_size - page_off);
        let page = self.read_range(page_off, page_len as usize)?;

        let (mut lo, mut hi) = (0usize, page.len() / rl);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let slot = &page[mid * rl..(mid + 1) * rl];
            let found = self
                .codec
                .decode_key(slot)
                .map_err(|e| self.corrupt(page_off + (mid * rl) as u64, e.to_string()))?;
            match found.cmp(key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => {
                    let offset = page_off + (mid * rl) as u64;
                    let record = self
                        .codec
                        .decode(slot, offset)
                        .map_err(|e| self.corrupt(offset, e.to_string()))?;
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// Every record, in key order.
    pub fn read_all(&self) -> Result<Vec<Record>> {
        self.cursor()?.collect()
    }

    /// A streaming, independently-owned scan over the data section.
    pub fn cursor(&self) -> Result<RecordCursor> {
        RecordCursor::new(&self.path, self.codec, self.file_size)
    }

    /// Linear scan checking delimiters and checksum of every record.
    ///
    /// # Errors
    ///
    /// [`SstError::Corrupt`] naming the offset of the first bad record.
    pub fn validate(&self) -> Result<()> {
        let rl = self.codec.record_len();
        let chunk_records = self.options.kv_per_page.max(1) as u64;
        let mut ordinal = 0u64;
        while ordinal < self.count {
            let n = chunk_records.min(self.count - ordinal);
            let offset = DATA_OFFSET + ordinal * rl as u64;
            let chunk = self.read_range(offset, n as usize * rl)?;
            for (i, slot) in chunk.chunks_exact(rl).enumerate() {
                if !self.codec.validate_slot(slot) {
                    let at = offset + (i * rl) as u64;
                    return Err(self.corrupt(at, "delimiter or checksum mismatch".to_string()).into());
                }
            }
            ordinal += n;
        }
        Ok(())
    }

    /// Releases the memory map and deletes the table and both companions.
    /// The file handle itself closes when the reader is dropped.
    pub fn unlink(&self) -> Result<()> {
        if let Ok(mut m) = self.mmap.write() {
            *m = None;
        }
        fs::remove_file(&self.path).with_context(|| format!("removing {}", self.path.display()))?;
        for companion in [index_path(&self.path), bloom_path(&self.path)] {
            match fs::remove_file(&companion) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(path = %self.path.display(), "unlinked sstable");
        Ok(())
    }

    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if let Ok(guard) = self.mmap.read() {
            if let Some(map) = guard.as_ref() {
                let start = offset as usize;
                if start + len <= map.len() {
                    return Ok(map[start..start + len].to_vec());
                }
            }
        }
        let mut f = self
            .file
            .lock()
            .map_err(|e| anyhow::anyhow!("lock poisoned: {}", e))?;
        f.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        f.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn corrupt(&self, offset: u64, reason: String) -> SstError {
        SstError::Corrupt {
            path: self.path.clone(),
            offset,
            reason,
        }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn index(&self) -> &SparseIndex {
        &self.index
    }

    #[must_use]
    pub fn bloom(&self) -> &BloomFilter {
        &self.bloom
    }

    #[must_use]
    pub fn first_key(&self) -> Option<&Value> {
        self.index.first_key()
    }

    /// Key of the last record, read from disk.
    pub fn last_key(&self) -> Result<Option<Value>> {
        if self.count == 0 {
            return Ok(None);
        }
        let rl = self.codec.record_len();
        let slot = self.read_range(self.file_size - rl as u64, rl)?;
        Ok(Some(self.codec.decode_key(&slot)?))
    }
}

impl std::fmt::Debug for SstReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SstReader")
            .field("path", &self.path)
            .field("records", &self.count)
            .field("index_entries", &self.index.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

fn load_companions(path: &Path, codec: &RecordCodec) -> Result<(SparseIndex, BloomFilter)> {
    let ipath = index_path(path);
    let mut r = BufReader::new(
        File::open(&ipath).with_context(|| format!("opening {}", ipath.display()))?,
    );
    let index = SparseIndex::read_from(&mut r, codec.key_type(), &ipath)?;

    let bpath = bloom_path(path);
    let mut r = BufReader::new(
        File::open(&bpath).with_context(|| format!("opening {}", bpath.display()))?,
    );
    let bloom = BloomFilter::read_from(&mut r).map_err(|e| SstError::Bloom {
        path: bpath.clone(),
        reason: e.to_string(),
    })?;
    Ok((index, bloom))
}

/// Sequential scan over a table's records, with its own file handle.
///
/// Yields `Err` once on a corrupt record and then stops.
pub struct RecordCursor {
    path: PathBuf,
    rdr: BufReader<File>,
    codec: RecordCodec,
    offset: u64,
    end: u64,
    slot: Vec<u8>,
    failed: bool,
}

impl RecordCursor {
    fn new(path: &Path, codec: RecordCodec, end: u64) -> Result<Self> {
        let mut f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        f.seek(SeekFrom::Start(DATA_OFFSET))?;
        Ok(Self {
            path: path.to_path_buf(),
            rdr: BufReader::with_capacity(64 * 1024, f),
            codec,
            offset: DATA_OFFSET,
            end,
            slot: vec![0u8; codec.record_len()],
            failed: false,
        })
    }

    fn read_next(&mut self) -> Result<Record> {
        self.rdr.read_exact(&mut self.slot)?;
        let record = self
            .codec
            .decode(&self.slot, self.offset)
            .map_err(|e| SstError::Corrupt {
                path: self.path.clone(),
                offset: self.offset,
                reason: e.to_string(),
            })?;
        self.offset += self.slot.len() as u64;
        Ok(record)
    }
}

impl Iterator for RecordCursor {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.end {
            return None;
        }
        let item = self.read_next();
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}
