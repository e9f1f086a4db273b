use anyhow::Result;
use config::StoreConfig;
use record::DataType;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::Engine;

/// `u32 -> str:16` store with background compaction off.
pub fn config(dir: &Path, threshold: usize) -> StoreConfig {
    StoreConfig::new(dir, DataType::U32, DataType::Str(16))
        .memtable_threshold(threshold)
        .kv_per_page(16)
        .compaction_interval(Duration::ZERO)
}

pub fn open(dir: &Path, threshold: usize) -> Result<Engine> {
    Engine::open(config(dir, threshold))
}

/// The string value stored for `key`, if live.
pub fn value(engine: &Engine, key: u32) -> Result<Option<String>> {
    Ok(engine
        .get(key)?
        .and_then(|r| r.value.as_str().map(str::to_string)))
}

pub fn count_sst_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "sst")
                .unwrap_or(false)
        })
        .count()
}
