//! Scalar types a store can be keyed or valued by.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::CodecError;

/// The closed set of key/value types. `Str` carries its declared byte width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Str(u32),
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
}

impl DataType {
    /// Number of bytes one encoded value occupies.
    #[must_use]
    pub fn byte_width(&self) -> usize {
        match self {
            DataType::Str(w) => *w as usize,
            DataType::I8 | DataType::U8 | DataType::Bool => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::I64 | DataType::U64 | DataType::F64 => 8,
        }
    }

    /// The one-byte tag stored in SST metadata and WAL entries.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            DataType::Str(_) => 0,
            DataType::I8 => 1,
            DataType::I16 => 2,
            DataType::I32 => 3,
            DataType::I64 => 4,
            DataType::U8 => 5,
            DataType::U16 => 6,
            DataType::U32 => 7,
            DataType::U64 => 8,
            DataType::F32 => 9,
            DataType::F64 => 10,
            DataType::Bool => 11,
        }
    }

    /// Inverse of [`tag`](DataType::tag). `width` is only used for strings.
    pub fn from_tag(tag: u8, width: u32) -> Result<Self, CodecError> {
        Ok(match tag {
            0 => DataType::Str(width),
            1 => DataType::I8,
            2 => DataType::I16,
            3 => DataType::I32,
            4 => DataType::I64,
            5 => DataType::U8,
            6 => DataType::U16,
            7 => DataType::U32,
            8 => DataType::U64,
            9 => DataType::F32,
            10 => DataType::F64,
            11 => DataType::Bool,
            other => return Err(CodecError::InvalidType(format!("tag {}", other))),
        })
    }

    /// The value written for tombstones and other placeholder slots.
    #[must_use]
    pub fn zero(&self) -> Value {
        match self {
            DataType::Str(_) => Value::Str(String::new()),
            DataType::I8 => Value::I8(0),
            DataType::I16 => Value::I16(0),
            DataType::I32 => Value::I32(0),
            DataType::I64 => Value::I64(0),
            DataType::U8 => Value::U8(0),
            DataType::U16 => Value::U16(0),
            DataType::U32 => Value::U32(0),
            DataType::U64 => Value::U64(0),
            DataType::F32 => Value::F32(0.0),
            DataType::F64 => Value::F64(0.0),
            DataType::Bool => Value::Bool(false),
        }
    }

    /// Returns `true` if `value` is a variant of this type.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (DataType::Str(_), Value::Str(_))
                | (DataType::I8, Value::I8(_))
                | (DataType::I16, Value::I16(_))
                | (DataType::I32, Value::I32(_))
                | (DataType::I64, Value::I64(_))
                | (DataType::U8, Value::U8(_))
                | (DataType::U16, Value::U16(_))
                | (DataType::U32, Value::U32(_))
                | (DataType::U64, Value::U64(_))
                | (DataType::F32, Value::F32(_))
                | (DataType::F64, Value::F64(_))
                | (DataType::Bool, Value::Bool(_))
        )
    }

    /// Type-checks `value` and brings it into the exact form that survives an
    /// encode/decode cycle: strings are cut to the declared width on a char
    /// boundary and lose trailing NULs.
    pub fn normalize(&self, value: Value) -> Result<Value, CodecError> {
        if !self.accepts(&value) {
            return Err(CodecError::TypeMismatch {
                expected: *self,
                actual: value.to_string(),
            });
        }
        match (self, value) {
            (DataType::Str(w), Value::Str(s)) => {
                let cut = truncate_to_width(&s, *w as usize).trim_end_matches('\0');
                Ok(Value::Str(cut.to_string()))
            }
            (_, v) => Ok(v),
        }
    }

    /// Appends the fixed-width little-endian encoding of `value` to `out`.
    pub fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<(), CodecError> {
        match (self, value) {
            (DataType::Str(w), Value::Str(s)) => {
                let width = *w as usize;
                let bytes = truncate_to_width(s, width).as_bytes();
                out.extend_from_slice(bytes);
                out.resize(out.len() + (width - bytes.len()), 0);
            }
            (DataType::I8, Value::I8(v)) => out.write_i8(*v)?,
            (DataType::I16, Value::I16(v)) => out.write_i16::<LittleEndian>(*v)?,
            (DataType::I32, Value::I32(v)) => out.write_i32::<LittleEndian>(*v)?,
            (DataType::I64, Value::I64(v)) => out.write_i64::<LittleEndian>(*v)?,
            (DataType::U8, Value::U8(v)) => out.write_u8(*v)?,
            (DataType::U16, Value::U16(v)) => out.write_u16::<LittleEndian>(*v)?,
            (DataType::U32, Value::U32(v)) => out.write_u32::<LittleEndian>(*v)?,
            (DataType::U64, Value::U64(v)) => out.write_u64::<LittleEndian>(*v)?,
            (DataType::F32, Value::F32(v)) => out.write_f32::<LittleEndian>(*v)?,
            (DataType::F64, Value::F64(v)) => out.write_f64::<LittleEndian>(*v)?,
            (DataType::Bool, Value::Bool(v)) => out.write_u8(u8::from(*v))?,
            (expected, actual) => {
                return Err(CodecError::TypeMismatch {
                    expected: *expected,
                    actual: actual.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Decodes one value from the first [`byte_width`](DataType::byte_width)
    /// bytes of `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let width = self.byte_width();
        if bytes.len() < width {
            return Err(CodecError::corrupt(
                0,
                format!("need {} bytes for {}, have {}", width, self, bytes.len()),
            ));
        }
        let b = &bytes[..width];
        Ok(match self {
            DataType::Str(_) => {
                let end = b.iter().rposition(|&x| x != 0).map_or(0, |p| p + 1);
                Value::Str(String::from_utf8_lossy(&b[..end]).into_owned())
            }
            DataType::I8 => Value::I8(b[0] as i8),
            DataType::I16 => Value::I16(LittleEndian::read_i16(b)),
            DataType::I32 => Value::I32(LittleEndian::read_i32(b)),
            DataType::I64 => Value::I64(LittleEndian::read_i64(b)),
            DataType::U8 => Value::U8(b[0]),
            DataType::U16 => Value::U16(LittleEndian::read_u16(b)),
            DataType::U32 => Value::U32(LittleEndian::read_u32(b)),
            DataType::U64 => Value::U64(LittleEndian::read_u64(b)),
            DataType::F32 => Value::F32(LittleEndian::read_f32(b)),
            DataType::F64 => Value::F64(LittleEndian::read_f64(b)),
            DataType::Bool => Value::Bool(b[0] != 0),
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Str(w) => write!(f, "str:{}", w),
            DataType::I8 => f.write_str("i8"),
            DataType::I16 => f.write_str("i16"),
            DataType::I32 => f.write_str("i32"),
            DataType::I64 => f.write_str("i64"),
            DataType::U8 => f.write_str("u8"),
            DataType::U16 => f.write_str("u16"),
            DataType::U32 => f.write_str("u32"),
            DataType::U64 => f.write_str("u64"),
            DataType::F32 => f.write_str("f32"),
            DataType::F64 => f.write_str("f64"),
            DataType::Bool => f.write_str("bool"),
        }
    }
}

impl FromStr for DataType {
    type Err = CodecError;

    /// Parses `i8`..`u64`, `f32`, `f64`, `bool` and `str:<width>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if let Some(width) = lower.strip_prefix("str:") {
            let width: u32 = width
                .parse()
                .map_err(|_| CodecError::InvalidType(s.to_string()))?;
            if width == 0 {
                return Err(CodecError::InvalidType(format!("{} (zero width)", s)));
            }
            return Ok(DataType::Str(width));
        }
        Ok(match lower.as_str() {
            "i8" => DataType::I8,
            "i16" => DataType::I16,
            "i32" => DataType::I32,
            "i64" => DataType::I64,
            "u8" => DataType::U8,
            "u16" => DataType::U16,
            "u32" => DataType::U32,
            "u64" => DataType::U64,
            "f32" => DataType::F32,
            "f64" => DataType::F64,
            "bool" => DataType::Bool,
            _ => return Err(CodecError::InvalidType(s.to_string())),
        })
    }
}

/// A typed key or value.
///
/// Values of the same variant are totally ordered (floats via
/// [`f64::total_cmp`], strings byte-wise), which is the order SSTables and the
/// memtable keep keys in. Values of different variants order by type tag; a
/// well-formed store never mixes them.
#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Str(_) => 0,
            Value::I8(_) => 1,
            Value::I16(_) => 2,
            Value::I32(_) => 3,
            Value::I64(_) => 4,
            Value::U8(_) => 5,
            Value::U16(_) => 6,
            Value::U32(_) => 7,
            Value::U64(_) => 8,
            Value::F32(_) => 9,
            Value::F64(_) => 10,
            Value::Bool(_) => 11,
        }
    }

    /// Returns the string payload, if this is a `Str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::I8(a), Value::I8(b)) => a.cmp(b),
            (Value::I16(a), Value::I16(b)) => a.cmp(b),
            (Value::I32(a), Value::I32(b)) => a.cmp(b),
            (Value::I64(a), Value::I64(b)) => a.cmp(b),
            (Value::U8(a), Value::U8(b)) => a.cmp(b),
            (Value::U16(a), Value::U16(b)) => a.cmp(b),
            (Value::U32(a), Value::U32(b)) => a.cmp(b),
            (Value::U64(a), Value::U64(b)) => a.cmp(b),
            (Value::F32(a), Value::F32(b)) => a.total_cmp(b),
            (Value::F64(a), Value::F64(b)) => a.total_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Str(v) => v.hash(state),
            Value::I8(v) => v.hash(state),
            Value::I16(v) => v.hash(state),
            Value::I32(v) => v.hash(state),
            Value::I64(v) => v.hash(state),
            Value::U8(v) => v.hash(state),
            Value::U16(v) => v.hash(state),
            Value::U32(v) => v.hash(state),
            Value::U64(v) => v.hash(state),
            Value::F32(v) => v.to_bits().hash(state),
            Value::F64(v) => v.to_bits().hash(state),
            Value::Bool(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(v) => f.write_str(v),
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! impl_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from!(
    String => Str,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    bool => Bool,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

/// Longest prefix of `s` that fits in `width` bytes without splitting a char.
fn truncate_to_width(s: &str, width: usize) -> &str {
    if s.len() <= width {
        return s;
    }
    let mut end = width;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
