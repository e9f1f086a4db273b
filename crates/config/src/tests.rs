use super::*;
use anyhow::Result;

#[test]
fn defaults() -> Result<()> {
    let cfg = StoreConfig::new("/tmp/db", DataType::U64, DataType::Str(16));
    assert_eq!(cfg.memtable_threshold, 100_000);
    assert_eq!(cfg.bloom_fpr, 0.2);
    assert_eq!(cfg.kv_per_page, 1000);
    assert_eq!(cfg.growth_factor, 10);
    assert_eq!(cfg.compaction_interval, Duration::from_secs(10));
    assert!(cfg.use_mmap);
    assert!(!cfg.wal_sync);
    assert!(cfg.compaction_threads >= 1 && cfg.compaction_threads <= 4);
    cfg.validate()?;
    Ok(())
}

#[test]
fn builder_sets_every_field() {
    let cfg = StoreConfig::new("/tmp/db", DataType::I32, DataType::Bool)
        .memtable_threshold(10)
        .bloom_fpr(0.05)
        .kv_per_page(4)
        .levels(3)
        .growth_factor(2)
        .compaction_threads(1)
        .compaction_interval(Duration::from_millis(50))
        .use_mmap(false)
        .wal_sync(true)
        .cache_capacity(0)
        .validate_on_open(true);

    assert_eq!(cfg.memtable_threshold, 10);
    assert_eq!(cfg.bloom_fpr, 0.05);
    assert_eq!(cfg.kv_per_page, 4);
    assert_eq!(cfg.levels, 3);
    assert_eq!(cfg.growth_factor, 2);
    assert_eq!(cfg.compaction_threads, 1);
    assert_eq!(cfg.compaction_interval, Duration::from_millis(50));
    assert!(!cfg.use_mmap);
    assert!(cfg.wal_sync);
    assert_eq!(cfg.cache_capacity, 0);
    assert!(cfg.validate_on_open);
    assert_eq!(cfg.max_records_per_file(), 20);
}

#[test]
fn paths() {
    let cfg = StoreConfig::new("/data/users", DataType::U8, DataType::U8);
    assert_eq!(cfg.wal_path(), PathBuf::from("/data/users/wal.log"));
    assert_eq!(cfg.level_dir(2), PathBuf::from("/data/users/level-2"));
}

#[test]
fn validate_rejects_out_of_range() {
    let base = || StoreConfig::new("/tmp/db", DataType::U64, DataType::U64);
    assert!(base().memtable_threshold(0).validate().is_err());
    assert!(base().bloom_fpr(0.0).validate().is_err());
    assert!(base().bloom_fpr(1.0).validate().is_err());
    assert!(base().kv_per_page(0).validate().is_err());
    assert!(base().levels(0).validate().is_err());
    assert!(base().growth_factor(1).validate().is_err());
    assert!(base().compaction_threads(0).validate().is_err());
    assert!(base().compression(Compression::Gzip).validate().is_err());
}

#[test]
fn flags_roundtrip() {
    for c in [
        Compression::None,
        Compression::Gzip,
        Compression::Brotli,
        Compression::Zlib,
    ] {
        assert_eq!(Compression::from_flag(c.flag()), Some(c));
    }
    for e in [Encoding::None, Encoding::RunLength, Encoding::Dict] {
        assert_eq!(Encoding::from_flag(e.flag()), Some(e));
    }
    assert_eq!(Compression::from_flag(9), None);
}
