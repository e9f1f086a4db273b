use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::{checksum, CodecError, DataType, Value};

/// Marks the start of every stored record ("STAR").
pub const START_DELIMITER: [u8; 4] = *b"STAR";
/// Marks the end of every stored record ("ENDE").
pub const END_DELIMITER: [u8; 4] = *b"ENDE";
/// Marks the start of a WAL entry ("WREC").
pub const WAL_START_DELIMITER: [u8; 4] = *b"WREC";
/// Marks the end of a WAL entry ("WEND").
pub const WAL_END_DELIMITER: [u8; 4] = *b"WEND";

/// Width of the checksum field.
pub const CHECKSUM_BYTES: usize = 4;

/// Fixed part of a stored record:
/// start(4) + key_len(4) + val_len(4) + crc_len(4) + crc(4) + timestamp(8) + tombstone(1) + end(4).
pub const BASE_BYTES: usize = 4 + 4 + 4 + 4 + CHECKSUM_BYTES + 8 + 1 + 4;

/// Offset of the key bytes inside a stored record.
pub const KEY_OFFSET: usize = 16;

/// Fixed part of a WAL entry:
/// start(4) + key_tag(1) + val_tag(1) + key_len(4) + val_len(4) + timestamp(8) + op(1) + end(4).
const WAL_BASE_BYTES: usize = 4 + 1 + 1 + 4 + 4 + 8 + 1 + 4;

/// The atomic unit of storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Value,
    pub value: Value,
    /// Monotonic write time; the larger timestamp wins on conflicts.
    pub timestamp: u64,
    /// `true` marks a logical delete.
    pub tombstone: bool,
    /// CRC32 over the encoded key+value bytes.
    pub checksum: u32,
}

/// Encoder/decoder for one store's key and value types.
///
/// Cheap to copy; every component that touches bytes holds its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordCodec {
    key_type: DataType,
    value_type: DataType,
}

impl RecordCodec {
    #[must_use]
    pub fn new(key_type: DataType, value_type: DataType) -> Self {
        Self {
            key_type,
            value_type,
        }
    }

    #[must_use]
    pub fn key_type(&self) -> DataType {
        self.key_type
    }

    #[must_use]
    pub fn value_type(&self) -> DataType {
        self.value_type
    }

    #[must_use]
    pub fn key_width(&self) -> usize {
        self.key_type.byte_width()
    }

    #[must_use]
    pub fn value_width(&self) -> usize {
        self.value_type.byte_width()
    }

    /// Length of every stored record for this store.
    #[must_use]
    pub fn record_len(&self) -> usize {
        BASE_BYTES + self.key_width() + self.value_width()
    }

    /// Length of every WAL entry for this store.
    #[must_use]
    pub fn wal_entry_len(&self) -> usize {
        WAL_BASE_BYTES + self.key_width() + self.value_width()
    }

    /// Builds a live record, computing its checksum.
    pub fn record(
        &self,
        key: impl Into<Value>,
        value: impl Into<Value>,
        timestamp: u64,
    ) -> Result<Record, CodecError> {
        self.build(key.into(), value.into(), timestamp, false)
    }

    /// Builds a tombstone for `key`. The value slot holds the value type's zero.
    pub fn tombstone(&self, key: impl Into<Value>, timestamp: u64) -> Result<Record, CodecError> {
        self.build(key.into(), self.value_type.zero(), timestamp, true)
    }

    /// Type-checks and normalizes a lookup key.
    pub fn key(&self, key: impl Into<Value>) -> Result<Value, CodecError> {
        self.key_type.normalize(key.into())
    }

    /// Encoded key bytes, as fed to bloom filters.
    pub fn key_bytes(&self, key: &Value) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(self.key_width());
        self.key_type.encode(key, &mut out)?;
        Ok(out)
    }

    fn build(
        &self,
        key: Value,
        value: Value,
        timestamp: u64,
        tombstone: bool,
    ) -> Result<Record, CodecError> {
        let key = self.key_type.normalize(key)?;
        let value = self.value_type.normalize(value)?;
        let checksum = checksum(&self.payload(&key, &value)?);
        Ok(Record {
            key,
            value,
            timestamp,
            tombstone,
            checksum,
        })
    }

    /// The key+value bytes the checksum is computed over.
    fn payload(&self, key: &Value, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(self.key_width() + self.value_width());
        self.key_type.encode(key, &mut out)?;
        self.value_type.encode(value, &mut out)?;
        Ok(out)
    }

    /// Encodes `record` into its stored form.
    pub fn encode(&self, record: &Record) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(self.record_len());
        self.encode_into(record, &mut out)?;
        Ok(out)
    }

    /// Appends the stored form of `record` to `out`.
    pub fn encode_into(&self, record: &Record, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(&START_DELIMITER);
        out.write_u32::<LittleEndian>(self.key_width() as u32)?;
        out.write_u32::<LittleEndian>(self.value_width() as u32)?;
        out.write_u32::<LittleEndian>(CHECKSUM_BYTES as u32)?;
        self.key_type.encode(&record.key, out)?;
        self.value_type.encode(&record.value, out)?;
        out.write_u32::<LittleEndian>(record.checksum)?;
        out.write_u64::<LittleEndian>(record.timestamp)?;
        out.write_u8(u8::from(record.tombstone))?;
        out.extend_from_slice(&END_DELIMITER);
        Ok(())
    }

    /// Decodes the stored record at the start of `slot`.
    ///
    /// `offset` is the slot's position in its file and only feeds error
    /// messages. Fails with [`CodecError::CorruptRecord`] on a delimiter or
    /// length mismatch, or when the recomputed checksum differs.
    pub fn decode(&self, slot: &[u8], offset: u64) -> Result<Record, CodecError> {
        self.check_frame(slot, offset)?;
        let kw = self.key_width();
        let vw = self.value_width();
        let payload = &slot[KEY_OFFSET..KEY_OFFSET + kw + vw];
        let mut pos = KEY_OFFSET + kw + vw;
        let stored = LittleEndian::read_u32(&slot[pos..pos + 4]);
        if checksum(payload) != stored {
            return Err(CodecError::corrupt(offset, "checksum mismatch"));
        }
        pos += CHECKSUM_BYTES;
        let timestamp = LittleEndian::read_u64(&slot[pos..pos + 8]);
        let tombstone = slot[pos + 8] != 0;

        Ok(Record {
            key: self.key_type.decode(&payload[..kw])?,
            value: self.value_type.decode(&payload[kw..])?,
            timestamp,
            tombstone,
            checksum: stored,
        })
    }

    /// Decodes only the key of the record at the start of `slot`, without
    /// checking delimiters or checksum.
    pub fn decode_key(&self, slot: &[u8]) -> Result<Value, CodecError> {
        let end = KEY_OFFSET + self.key_width();
        if slot.len() < end {
            return Err(CodecError::corrupt(0, "slot shorter than key field"));
        }
        self.key_type.decode(&slot[KEY_OFFSET..end])
    }

    /// Delimiter, length and checksum check without building a [`Record`].
    #[must_use]
    pub fn validate_slot(&self, slot: &[u8]) -> bool {
        if self.check_frame(slot, 0).is_err() {
            return false;
        }
        let end = KEY_OFFSET + self.key_width() + self.value_width();
        let stored = LittleEndian::read_u32(&slot[end..end + 4]);
        checksum(&slot[KEY_OFFSET..end]) == stored
    }

    fn check_frame(&self, slot: &[u8], offset: u64) -> Result<(), CodecError> {
        let len = self.record_len();
        if slot.len() < len {
            return Err(CodecError::corrupt(
                offset,
                format!("short record: {} of {} bytes", slot.len(), len),
            ));
        }
        if slot[..4] != START_DELIMITER {
            return Err(CodecError::corrupt(offset, "bad start delimiter"));
        }
        if slot[len - 4..len] != END_DELIMITER {
            return Err(CodecError::corrupt(offset, "bad end delimiter"));
        }
        let key_len = LittleEndian::read_u32(&slot[4..8]) as usize;
        let val_len = LittleEndian::read_u32(&slot[8..12]) as usize;
        let crc_len = LittleEndian::read_u32(&slot[12..16]) as usize;
        if key_len != self.key_width() || val_len != self.value_width() || crc_len != CHECKSUM_BYTES
        {
            return Err(CodecError::corrupt(
                offset,
                format!(
                    "length fields {}/{}/{} do not match {}/{}/{}",
                    key_len,
                    val_len,
                    crc_len,
                    self.key_width(),
                    self.value_width(),
                    CHECKSUM_BYTES
                ),
            ));
        }
        Ok(())
    }

    /// Encodes `record` with operation code `op` into its WAL form.
    pub fn encode_wal(&self, record: &Record, op: u8) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(self.wal_entry_len());
        out.extend_from_slice(&WAL_START_DELIMITER);
        out.write_u8(self.key_type.tag())?;
        out.write_u8(self.value_type.tag())?;
        out.write_u32::<LittleEndian>(self.key_width() as u32)?;
        out.write_u32::<LittleEndian>(self.value_width() as u32)?;
        self.key_type.encode(&record.key, &mut out)?;
        self.value_type.encode(&record.value, &mut out)?;
        out.write_u64::<LittleEndian>(record.timestamp)?;
        out.write_u8(op)?;
        out.extend_from_slice(&WAL_END_DELIMITER);
        Ok(out)
    }

    /// Decodes one WAL entry from the start of `bytes`, returning the record
    /// and its operation code. The record's tombstone flag is left `false`;
    /// the WAL layer derives it from the operation.
    pub fn decode_wal(&self, bytes: &[u8], offset: u64) -> Result<(Record, u8), CodecError> {
        let len = self.wal_entry_len();
        if bytes.len() < len {
            return Err(CodecError::corrupt(offset, "short WAL entry"));
        }
        if bytes[..4] != WAL_START_DELIMITER {
            return Err(CodecError::corrupt(offset, "bad WAL start delimiter"));
        }
        if bytes[len - 4..len] != WAL_END_DELIMITER {
            return Err(CodecError::corrupt(offset, "bad WAL end delimiter"));
        }
        let key_tag = bytes[4];
        let val_tag = bytes[5];
        let key_len = LittleEndian::read_u32(&bytes[6..10]);
        let val_len = LittleEndian::read_u32(&bytes[10..14]);
        if DataType::from_tag(key_tag, key_len)? != self.key_type
            || DataType::from_tag(val_tag, val_len)? != self.value_type
        {
            return Err(CodecError::corrupt(
                offset,
                format!(
                    "WAL entry types {}/{} do not match the store's {}/{}",
                    key_tag,
                    val_tag,
                    self.key_type.tag(),
                    self.value_type.tag()
                ),
            ));
        }
        let kw = self.key_width();
        let vw = self.value_width();
        let payload = &bytes[14..14 + kw + vw];
        let pos = 14 + kw + vw;
        let timestamp = LittleEndian::read_u64(&bytes[pos..pos + 8]);
        let op = bytes[pos + 8];

        let record = Record {
            key: self.key_type.decode(&payload[..kw])?,
            value: self.value_type.decode(&payload[kw..])?,
            timestamp,
            tombstone: false,
            checksum: checksum(payload),
        };
        Ok((record, op))
    }
}
