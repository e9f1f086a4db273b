use crate::*;
use anyhow::Result;
use record::{DataType, Record, RecordCodec};
use std::path::{Path, PathBuf};

mod merge_tests;

pub(crate) fn codec() -> RecordCodec {
    RecordCodec::new(DataType::U32, DataType::Str(8))
}

pub(crate) fn opts(kv_per_page: usize) -> SstOptions {
    SstOptions {
        kv_per_page,
        ..SstOptions::default()
    }
}

/// `(key, value, timestamp)` live records.
pub(crate) fn records(items: &[(u32, &str, u64)]) -> Result<Vec<Record>> {
    let c = codec();
    items
        .iter()
        .map(|&(k, v, ts)| Ok(c.record(k, v, ts)?))
        .collect()
}

/// Writes `records` to a finished table at `dir/name`.
pub(crate) fn write_table(
    dir: &Path,
    name: &str,
    records: &[Record],
    options: SstOptions,
) -> Result<PathBuf> {
    let mut w = SstWriter::create(&dir.join(name), codec(), options)?;
    w.write(records)?;
    w.finish()
}

pub(crate) fn sequential(n: u32) -> Result<Vec<Record>> {
    let c = codec();
    (0..n)
        .map(|k| Ok(c.record(k, format!("v{}", k).as_str(), u64::from(k) + 1)?))
        .collect()
}
