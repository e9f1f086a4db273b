//! SSTable header layout and validation.
//!
//! ```text
//! byte  0      header length (7)
//! bytes 1..5   magic "SSTT"
//! byte  5      version (1)
//! byte  6      compression flag
//! byte  7      encoding flag
//! byte  8      metadata length (3)
//! byte  9      value type tag
//! byte  10     key type tag
//! byte  11     record length (low byte)
//! byte  12     '\n'
//! ```
//!
//! Records start at [`DATA_OFFSET`]. The record length field is one byte
//! wide, so it holds `record_len % 256`; the full length is derived from the
//! validated key and value types.

use byteorder::{ReadBytesExt, WriteBytesExt};
use config::{Compression, Encoding};
use record::RecordCodec;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::{SstError, SstOptions};

/// Value of header byte 0: magic + version + compression + encoding.
pub const HEADER_LEN: u8 = 7;

/// Magic number identifying SSTable files (ASCII "SSTT").
pub const SST_MAGIC: [u8; 4] = *b"SSTT";

/// Current (and only) format version.
pub const SST_VERSION: u8 = 1;

/// Value of the metadata length byte: value type + key type + record length.
pub const METADATA_LEN: u8 = 3;

/// Separator between metadata and data.
pub const SEPARATOR: u8 = b'\n';

/// Byte offset of the first record.
pub const DATA_OFFSET: u64 = 1 + HEADER_LEN as u64 + 1 + METADATA_LEN as u64 + 1;

/// Parsed header and metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub header_len: u8,
    pub magic: [u8; 4],
    pub version: u8,
    pub compression: u8,
    pub encoding: u8,
    pub metadata_len: u8,
    pub value_type: u8,
    pub key_type: u8,
    pub record_len: u8,
    pub separator: u8,
}

impl Header {
    /// The header a file written for `codec` and `options` must carry.
    #[must_use]
    pub fn expected(codec: &RecordCodec, options: &SstOptions) -> Self {
        Self {
            header_len: HEADER_LEN,
            magic: SST_MAGIC,
            version: SST_VERSION,
            compression: options.compression.flag(),
            encoding: options.encoding.flag(),
            metadata_len: METADATA_LEN,
            value_type: codec.value_type().tag(),
            key_type: codec.key_type().tag(),
            record_len: codec.record_len() as u8,
            separator: SEPARATOR,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.header_len)?;
        w.write_all(&self.magic)?;
        w.write_u8(self.version)?;
        w.write_u8(self.compression)?;
        w.write_u8(self.encoding)?;
        w.write_u8(self.metadata_len)?;
        w.write_u8(self.value_type)?;
        w.write_u8(self.key_type)?;
        w.write_u8(self.record_len)?;
        w.write_u8(self.separator)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let header_len = r.read_u8()?;
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        Ok(Self {
            header_len,
            magic,
            version: r.read_u8()?,
            compression: r.read_u8()?,
            encoding: r.read_u8()?,
            metadata_len: r.read_u8()?,
            value_type: r.read_u8()?,
            key_type: r.read_u8()?,
            record_len: r.read_u8()?,
            separator: r.read_u8()?,
        })
    }

    /// Compares field by field against `expected`, reporting the first
    /// mismatch as [`SstError::Init`].
    pub fn check(&self, expected: &Header, path: &Path) -> Result<(), SstError> {
        let fields: [(&'static str, String, String); 10] = [
            ("header length", expected.header_len.to_string(), self.header_len.to_string()),
            ("magic", format!("{:?}", expected.magic), format!("{:?}", self.magic)),
            ("version", expected.version.to_string(), self.version.to_string()),
            (
                "compression flag",
                compression_name(expected.compression),
                compression_name(self.compression),
            ),
            (
                "encoding flag",
                encoding_name(expected.encoding),
                encoding_name(self.encoding),
            ),
            ("metadata length", expected.metadata_len.to_string(), self.metadata_len.to_string()),
            ("value type", expected.value_type.to_string(), self.value_type.to_string()),
            ("key type", expected.key_type.to_string(), self.key_type.to_string()),
            ("record length", expected.record_len.to_string(), self.record_len.to_string()),
            ("separator", expected.separator.to_string(), self.separator.to_string()),
        ];
        for (field, want, got) in fields {
            if want != got {
                return Err(SstError::Init {
                    path: path.to_path_buf(),
                    field,
                    expected: want,
                    actual: got,
                });
            }
        }
        Ok(())
    }
}

fn compression_name(flag: u8) -> String {
    match Compression::from_flag(flag) {
        Some(c) => c.to_string(),
        None => format!("unknown ({})", flag),
    }
}

fn encoding_name(flag: u8) -> String {
    match Encoding::from_flag(flag) {
        Some(e) => e.to_string(),
        None => format!("unknown ({})", flag),
    }
}
