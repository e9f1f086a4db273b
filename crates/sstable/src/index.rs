//! Sparse index: the first key of every page mapped to its byte offset.
//!
//! Persisted as a single line of comma-joined `key,offset` tokens. Numeric
//! keys are written in decimal, booleans as `0`/`1`, and strings hex-encoded
//! so that commas and newlines inside keys cannot break the framing.

use anyhow::{Context, Result};
use record::{DataType, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::{BufRead, Write};
use std::ops::Bound;
use std::path::Path;

use crate::SstError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseIndex {
    entries: BTreeMap<Value, u64>,
}

impl SparseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Value, offset: u64) {
        self.entries.insert(key, offset);
    }

    /// The greatest indexed key `<= key`, with its offset.
    pub fn floor(&self, key: &Value) -> Option<(&Value, u64)> {
        self.entries
            .range((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(k, o)| (k, *o))
    }

    pub fn first_key(&self) -> Option<&Value> {
        self.entries.keys().next()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, u64)> {
        self.entries.iter().map(|(k, o)| (k, *o))
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut line = String::new();
        for (i, (key, offset)) in self.entries.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            push_key_token(&mut line, key);
            let _ = write!(line, ",{}", offset);
        }
        line.push('\n');
        w.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Parses an index written by [`write_to`](SparseIndex::write_to) for a
    /// store keyed by `key_type`. `path` only feeds error messages.
    pub fn read_from<R: BufRead>(r: &mut R, key_type: DataType, path: &Path) -> Result<Self> {
        let mut line = String::new();
        r.read_line(&mut line)
            .with_context(|| format!("reading {}", path.display()))?;
        let line = line.trim_end_matches(&['\n', '\r'][..]);

        let mut index = Self::new();
        if line.is_empty() {
            return Ok(index);
        }

        let bad = |reason: String| SstError::Index {
            path: path.to_path_buf(),
            reason,
        };
        let tokens: Vec<&str> = line.split(',').collect();
        if tokens.len() % 2 != 0 {
            return Err(bad(format!("odd token count {}", tokens.len())).into());
        }
        for pair in tokens.chunks(2) {
            let key = parse_key_token(pair[0], key_type)
                .ok_or_else(|| bad(format!("bad {} key {:?}", key_type, pair[0])))?;
            let offset: u64 = pair[1]
                .parse()
                .map_err(|_| bad(format!("bad offset {:?}", pair[1])))?;
            index.insert(key, offset);
        }
        Ok(index)
    }
}

fn push_key_token(out: &mut String, key: &Value) {
    match key {
        Value::Str(s) => {
            for b in s.as_bytes() {
                let _ = write!(out, "{:02x}", b);
            }
        }
        Value::Bool(b) => out.push(if *b { '1' } else { '0' }),
        other => {
            let _ = write!(out, "{}", other);
        }
    }
}

fn parse_key_token(token: &str, key_type: DataType) -> Option<Value> {
    Some(match key_type {
        DataType::Str(_) => {
            if token.len() % 2 != 0 {
                return None;
            }
            let bytes = (0..token.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(token.get(i..i + 2)?, 16).ok())
                .collect::<Option<Vec<u8>>>()?;
            Value::Str(String::from_utf8(bytes).ok()?)
        }
        DataType::I8 => Value::I8(token.parse().ok()?),
        DataType::I16 => Value::I16(token.parse().ok()?),
        DataType::I32 => Value::I32(token.parse().ok()?),
        DataType::I64 => Value::I64(token.parse().ok()?),
        DataType::U8 => Value::U8(token.parse().ok()?),
        DataType::U16 => Value::U16(token.parse().ok()?),
        DataType::U32 => Value::U32(token.parse().ok()?),
        DataType::U64 => Value::U64(token.parse().ok()?),
        DataType::F32 => Value::F32(token.parse().ok()?),
        DataType::F64 => Value::F64(token.parse().ok()?),
        DataType::Bool => match token {
            "0" => Value::Bool(false),
            "1" => Value::Bool(true),
            _ => return None,
        },
    })
}
