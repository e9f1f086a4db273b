//! # WAL - Write-Ahead Log
//!
//! Provides crash-safe durability for the StrataKV storage engine.
//!
//! Every mutation (insert or delete) is encoded with the store's
//! [`RecordCodec`] and appended to the WAL **before** the corresponding
//! memtable update. On restart the WAL is replayed to reconstruct the
//! memtable. Once the memtable has been durably flushed to an SSTable the log
//! is truncated back to its header, so replay only ever sees records that are
//! not yet in an SSTable.
//!
//! ## File Format
//!
//! ```text
//! "WALF" '\n'                                   5-byte header
//! [entry][entry][entry]...                      fixed-length entries
//! ```
//!
//! Entry: `"WREC" | key_tag | value_tag | key_len u32 | val_len u32 | key | value | timestamp u64 | op u8 | "WEND"`
//!
//! ## Lifecycle
//!
//! ```text
//! Closed --open--> Open --append--> Appending* --truncate--> Truncated --append--> Appending*
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use record::{DataType, RecordCodec};
//! use wal::{Wal, WalOp};
//!
//! let codec = RecordCodec::new(DataType::Str(8), DataType::U32);
//! let mut wal = Wal::open("wal.log", codec, true).unwrap();
//! wal.append(&codec.record("hello", 1u32, 1).unwrap(), WalOp::Insert).unwrap();
//!
//! for entry in wal.read_all().unwrap() {
//!     println!("{:?} {:?}", entry.op, entry.record);
//! }
//! ```

use record::{CodecError, Record, RecordCodec};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// File magic ("WALF").
pub const WAL_MAGIC: [u8; 4] = *b"WALF";

/// Magic plus the newline separator.
pub const WAL_HEADER_LEN: u64 = 5;

/// The operation a WAL entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalOp {
    Insert,
    Delete,
}

impl WalOp {
    /// The on-disk operation code.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            WalOp::Insert => 0,
            WalOp::Delete => 2,
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(WalOp::Insert),
            2 => Some(WalOp::Delete),
            _ => None,
        }
    }
}

/// One replayed entry. `record.tombstone` is set for deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub op: WalOp,
    pub record: Record,
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The file exists but does not start with the WAL header.
    #[error("invalid WAL header in {path}: expected {expected:?}, found {actual:?}")]
    Init {
        path: PathBuf,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    /// An entry failed delimiter or type validation, or carried an unknown op code.
    #[error("corrupt WAL entry at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// A record could not be encoded with the store's codec.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Append-only write-ahead log for one store.
///
/// Entries go through a `BufWriter`; with `sync == true` every append is also
/// flushed and fsynced before it returns. Buffered bytes are always flushed
/// before [`read_all`](Wal::read_all), [`truncate`](Wal::truncate) and
/// [`close`](Wal::close), so ordering between appends and truncation holds in
/// both modes.
pub struct Wal {
    path: PathBuf,
    codec: RecordCodec,
    sync: bool,
    writer: BufWriter<File>,
    /// Header plus every acknowledged entry, buffered or on disk.
    committed: u64,
}

impl Wal {
    /// Opens (or creates) the WAL at `path`.
    ///
    /// A new or empty file gets the header written and synced. An existing file
    /// must start with the header, otherwise [`WalError::Init`] is returned.
    /// A partial entry left at the end by a crash is cut off, so new entries
    /// start on an entry boundary.
    pub fn open<P: AsRef<Path>>(path: P, codec: RecordCodec, sync: bool) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let mut file = open_append(&path)?;

        let mut len = file.metadata()?.len();
        if len == 0 {
            file.write_all(&header())?;
            file.sync_all()?;
            len = WAL_HEADER_LEN;
            debug!(path = %path.display(), "created WAL");
        } else {
            let mut found = Vec::with_capacity(WAL_HEADER_LEN as usize);
            File::open(&path)?
                .take(WAL_HEADER_LEN)
                .read_to_end(&mut found)?;
            if found != header() {
                return Err(WalError::Init {
                    path,
                    expected: header().to_vec(),
                    actual: found,
                });
            }

            let torn = (len - WAL_HEADER_LEN) % codec.wal_entry_len() as u64;
            if torn != 0 {
                len -= torn;
                file.set_len(len)?;
                file.sync_all()?;
                warn!(path = %path.display(), offset = len, bytes = torn, "cut torn WAL tail");
            }
        }

        Ok(Self {
            path,
            codec,
            sync,
            writer: BufWriter::new(file),
            committed: len,
        })
    }

    /// Encodes `record` and appends it with operation `op`.
    ///
    /// On a write error the file handle is reopened and the append retried
    /// once; a second failure is returned to the caller.
    pub fn append(&mut self, record: &Record, op: WalOp) -> Result<(), WalError> {
        let bytes = self.codec.encode_wal(record, op.code())?;
        if let Err(e) = self.write_entry(&bytes) {
            warn!(path = %self.path.display(), error = %e, "WAL append failed, reopening");
            self.reopen()?;
            self.write_entry(&bytes)?;
        }
        self.committed += bytes.len() as u64;
        Ok(())
    }

    fn write_entry(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        if self.sync {
            self.writer.flush()?;
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Replaces the handle and brings the file back to exactly the
    /// acknowledged entries.
    ///
    /// Bytes past `committed` (part of the failed entry) are cut off;
    /// acknowledged bytes still sitting in the old buffer are written out.
    fn reopen(&mut self) -> Result<(), WalError> {
        let file = open_append(&self.path)?;
        let old = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (old_file, buffered) = old.into_parts();
        let buffered = buffered.unwrap_or_else(|panicked| panicked.into_inner());
        let on_disk = old_file.metadata()?.len();
        drop(old_file);

        let file = self.writer.get_mut();
        if on_disk > self.committed {
            file.set_len(self.committed)?;
        } else if on_disk < self.committed {
            let missing = (self.committed - on_disk) as usize;
            if buffered.len() < missing {
                return Err(WalError::Corrupt {
                    offset: on_disk,
                    reason: format!(
                        "{} acknowledged bytes lost, only {} buffered",
                        missing,
                        buffered.len()
                    ),
                });
            }
            file.write_all(&buffered[..missing])?;
        }
        file.sync_data()?;
        debug!(path = %self.path.display(), committed = self.committed, "reopened WAL");
        Ok(())
    }

    /// Replays every entry past the header, calling `apply` in log order.
    ///
    /// # Termination
    ///
    /// - **Clean EOF** -> `Ok(())`.
    /// - **Truncated tail** (partial entry at the end, e.g. crash mid-write) ->
    ///   `Ok(())` after yielding all complete entries before it.
    /// - **Delimiter, type or op-code mismatch** -> `Err(WalError::Corrupt)`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<(), WalError>
    where
        F: FnMut(WalEntry),
    {
        self.writer.flush()?;

        let mut rdr = BufReader::new(File::open(&self.path)?);
        let mut skip = [0u8; WAL_HEADER_LEN as usize];
        rdr.read_exact(&mut skip)?;

        let mut buf = vec![0u8; self.codec.wal_entry_len()];
        let mut offset = WAL_HEADER_LEN;
        loop {
            match read_full(&mut rdr, &mut buf)? {
                0 => return Ok(()),
                n if n < buf.len() => {
                    warn!(
                        path = %self.path.display(),
                        offset,
                        bytes = n,
                        "ignoring truncated WAL tail"
                    );
                    return Ok(());
                }
                _ => {}
            }

            let (mut record, code) = self.codec.decode_wal(&buf, offset).map_err(|e| match e {
                CodecError::CorruptRecord { offset, reason } => WalError::Corrupt { offset, reason },
                other => WalError::Codec(other),
            })?;
            let op = WalOp::from_code(code).ok_or_else(|| WalError::Corrupt {
                offset,
                reason: format!("unknown op code {}", code),
            })?;
            record.tombstone = op == WalOp::Delete;
            apply(WalEntry { op, record });

            offset += buf.len() as u64;
        }
    }

    /// Collects every entry past the header, in log order.
    pub fn read_all(&mut self) -> Result<Vec<WalEntry>, WalError> {
        let mut entries = Vec::new();
        self.replay(|e| entries.push(e))?;
        Ok(entries)
    }

    /// Resets the log to just its header and syncs.
    ///
    /// Call only after everything appended so far is durable elsewhere.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.set_len(WAL_HEADER_LEN)?;
        file.sync_all()?;
        self.committed = WAL_HEADER_LEN;
        debug!(path = %self.path.display(), "truncated WAL");
        Ok(())
    }

    /// Flushes buffered entries and fsyncs the file.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Bytes on disk plus bytes still buffered.
    pub fn size(&self) -> Result<u64, WalError> {
        let on_disk = self.writer.get_ref().metadata()?.len();
        Ok(on_disk + self.writer.buffer().len() as u64)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Syncs and releases the file handle.
    pub fn close(mut self) -> Result<(), WalError> {
        self.sync()
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("path", &self.path)
            .field("sync", &self.sync)
            .field("buffered", &self.writer.buffer().len())
            .finish()
    }
}

fn header() -> [u8; WAL_HEADER_LEN as usize] {
    let mut h = [b'\n'; WAL_HEADER_LEN as usize];
    h[..4].copy_from_slice(&WAL_MAGIC);
    h
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(path)
}

/// Like `read_exact`, but reports how many bytes were read before EOF.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests;
