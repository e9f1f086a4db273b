use super::helpers::*;
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

// --------------------- Insert ---------------------

#[test]
fn insert_then_get() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 100)?;
    engine.insert(1u32, "one")?;
    engine.insert(2u32, "two")?;

    assert_eq!(value(&engine, 1)?.as_deref(), Some("one"));
    assert_eq!(value(&engine, 2)?.as_deref(), Some("two"));
    assert!(engine.get(3u32)?.is_none());
    Ok(())
}

#[test]
fn overwrite_returns_latest() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 100)?;
    engine.insert(1u32, "a")?;
    engine.insert(1u32, "b")?;
    engine.insert(1u32, "c")?;
    assert_eq!(value(&engine, 1)?.as_deref(), Some("c"));
    assert_eq!(engine.stats()?.memtable_len, 1);
    Ok(())
}

#[test]
fn wrong_types_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 100)?;
    assert!(engine.insert(1i64, "x").is_err());
    assert!(engine.insert(1u32, 7u8).is_err());
    assert_eq!(engine.stats()?.memtable_len, 0);
    Ok(())
}

#[test]
fn long_strings_are_truncated() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 100)?;
    engine.insert(1u32, "0123456789abcdefXYZ")?;
    assert_eq!(value(&engine, 1)?.as_deref(), Some("0123456789abcdef"));
    Ok(())
}

#[test]
fn timestamps_strictly_increase() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 1000)?;
    let mut last = 0;
    for k in 0..200u32 {
        engine.insert(k, "v")?;
        let ts = engine.get(k)?.unwrap().timestamp;
        assert!(ts > last);
        last = ts;
    }
    Ok(())
}

// --------------------- Delete ---------------------

#[test]
fn delete_unknown_key_writes_nothing() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 100)?;
    let before = engine.stats()?.wal_size;

    assert!(!engine.delete(42u32)?);
    assert_eq!(engine.stats()?.wal_size, before);
    assert_eq!(engine.stats()?.memtable_len, 0);
    Ok(())
}

#[test]
fn delete_hides_memtable_value() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 100)?;
    engine.insert(1u32, "a")?;

    assert!(engine.delete(1u32)?);
    assert!(engine.get(1u32)?.is_none());
    assert!(!engine.has(1u32)?);
    Ok(())
}

#[test]
fn delete_hides_flushed_value() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 100)?;
    engine.insert(1u32, "a")?;
    engine.flush()?;

    assert!(engine.delete(1u32)?);
    assert!(engine.get(1u32)?.is_none());
    engine.flush()?;
    assert!(engine.get(1u32)?.is_none());
    Ok(())
}

// --------------------- Flush ---------------------

#[test]
fn threshold_triggers_flush_and_truncates_wal() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 10)?;
    for k in 0..10u32 {
        engine.insert(k, "v")?;
    }

    let stats = engine.stats()?;
    assert_eq!(stats.level_file_counts[0], 1);
    assert_eq!(stats.level_record_counts[0], 10);
    assert_eq!(stats.memtable_len, 0);
    assert_eq!(stats.wal_size, wal::WAL_HEADER_LEN);
    assert_eq!(count_sst_files(&engine.config().level_dir(0)), 1);
    Ok(())
}

#[test]
fn manual_flush() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 100)?;
    engine.flush()?; // empty: no-op
    assert_eq!(engine.stats()?.total_files(), 0);

    engine.insert(5u32, "x")?;
    engine.flush()?;
    let stats = engine.stats()?;
    assert_eq!(stats.level_file_counts[0], 1);
    assert_eq!(stats.memtable_len, 0);
    assert_eq!(value(&engine, 5)?.as_deref(), Some("x"));
    Ok(())
}

#[test]
fn each_flush_adds_a_level0_file() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 4)?;
    for k in 0..12u32 {
        engine.insert(k, "v")?;
    }
    assert_eq!(engine.stats()?.level_file_counts[0], 3);
    Ok(())
}

// --------------------- Clear / close ---------------------

#[test]
fn clear_removes_everything() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 4)?;
    for k in 0..10u32 {
        engine.insert(k, "v")?;
    }
    engine.clear()?;

    let stats = engine.stats()?;
    assert_eq!(stats.total_files(), 0);
    assert_eq!(stats.memtable_len, 0);
    assert_eq!(stats.cache_len, 0);
    assert_eq!(stats.wal_size, wal::WAL_HEADER_LEN);
    assert_eq!(count_sst_files(&engine.config().level_dir(0)), 0);
    assert!(engine.get(3u32)?.is_none());

    // still usable
    engine.insert(3u32, "back")?;
    assert_eq!(value(&engine, 3)?.as_deref(), Some("back"));
    Ok(())
}

#[test]
fn closed_engine_rejects_operations() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open(dir.path(), 100)?;
    engine.insert(1u32, "a")?;
    engine.close()?;
    engine.close()?; // idempotent

    assert!(engine.insert(2u32, "b").is_err());
    assert!(engine.get(1u32).is_err());
    assert!(engine.delete(1u32).is_err());
    Ok(())
}
