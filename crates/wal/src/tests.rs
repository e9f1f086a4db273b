use super::*;
use anyhow::Result;
use record::{DataType, Value};
use std::fs;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn codec() -> RecordCodec {
    RecordCodec::new(DataType::Str(8), DataType::I64)
}

fn put(key: &str, value: i64, ts: u64) -> Record {
    codec().record(key, value, ts).unwrap()
}

fn del(key: &str, ts: u64) -> Record {
    codec().tombstone(key, ts).unwrap()
}

// -------------------- Header --------------------

#[test]
fn open_writes_header_on_new_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wal.log");
    let wal = Wal::open(&path, codec(), false)?;
    assert_eq!(wal.size()?, WAL_HEADER_LEN);
    drop(wal);
    assert_eq!(fs::read(&path)?, b"WALF\n");
    Ok(())
}

#[test]
fn open_rejects_foreign_header() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wal.log");
    fs::write(&path, b"NOPE\nrest")?;

    match Wal::open(&path, codec(), false) {
        Err(WalError::Init {
            expected, actual, ..
        }) => {
            assert_eq!(expected, b"WALF\n");
            assert_eq!(actual, b"NOPE\n");
        }
        other => panic!("expected Init error, got {:?}", other),
    }
    Ok(())
}

#[test]
fn open_rejects_short_header() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wal.log");
    fs::write(&path, b"WA")?;
    assert!(matches!(
        Wal::open(&path, codec(), false),
        Err(WalError::Init { .. })
    ));
    Ok(())
}

// -------------------- Append & replay --------------------

#[test]
fn append_and_read_all_in_order() -> Result<()> {
    let dir = tempdir()?;
    let mut wal = Wal::open(dir.path().join("wal.log"), codec(), true)?;

    wal.append(&put("k1", 1, 1), WalOp::Insert)?;
    wal.append(&put("k2", 2, 2), WalOp::Insert)?;
    wal.append(&del("k1", 3), WalOp::Delete)?;

    let entries = wal.read_all()?;
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].op, WalOp::Insert);
    assert_eq!(entries[0].record, put("k1", 1, 1));
    assert_eq!(entries[1].record, put("k2", 2, 2));
    assert_eq!(entries[2].op, WalOp::Delete);
    assert!(entries[2].record.tombstone);
    assert_eq!(entries[2].record.key, Value::from("k1"));
    assert_eq!(entries[2].record.timestamp, 3);
    Ok(())
}

#[test]
fn buffered_appends_are_visible_to_replay() -> Result<()> {
    let dir = tempdir()?;
    let mut wal = Wal::open(dir.path().join("wal.log"), codec(), false)?;
    for i in 0..100 {
        wal.append(&put(&format!("k{}", i), i, i as u64), WalOp::Insert)?;
    }
    assert_eq!(wal.read_all()?.len(), 100);
    Ok(())
}

#[test]
fn entries_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wal.log");
    {
        let mut wal = Wal::open(&path, codec(), false)?;
        wal.append(&put("a", 1, 1), WalOp::Insert)?;
        wal.close()?;
    }
    {
        let mut wal = Wal::open(&path, codec(), false)?;
        wal.append(&put("b", 2, 2), WalOp::Insert)?;
        wal.close()?;
    }
    let mut wal = Wal::open(&path, codec(), false)?;
    let keys: Vec<Value> = wal.read_all()?.into_iter().map(|e| e.record.key).collect();
    assert_eq!(keys, vec![Value::from("a"), Value::from("b")]);
    Ok(())
}

#[test]
fn empty_wal_replays_nothing() -> Result<()> {
    let dir = tempdir()?;
    let mut wal = Wal::open(dir.path().join("wal.log"), codec(), false)?;
    assert!(wal.read_all()?.is_empty());
    Ok(())
}

#[test]
fn entry_size_is_fixed() -> Result<()> {
    let dir = tempdir()?;
    let mut wal = Wal::open(dir.path().join("wal.log"), codec(), true)?;
    wal.append(&put("x", 0, 0), WalOp::Insert)?;
    wal.append(&put("longer12", i64::MAX, u64::MAX), WalOp::Insert)?;
    assert_eq!(
        wal.size()?,
        WAL_HEADER_LEN + 2 * codec().wal_entry_len() as u64
    );
    Ok(())
}

// -------------------- Truncate --------------------

#[test]
fn truncate_resets_to_header() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wal.log");
    let mut wal = Wal::open(&path, codec(), false)?;
    wal.append(&put("a", 1, 1), WalOp::Insert)?;
    wal.append(&put("b", 2, 2), WalOp::Insert)?;

    wal.truncate()?;
    assert_eq!(wal.size()?, WAL_HEADER_LEN);
    assert!(wal.read_all()?.is_empty());
    assert_eq!(fs::read(&path)?, b"WALF\n");
    Ok(())
}

#[test]
fn appends_after_truncate_land_after_header() -> Result<()> {
    let dir = tempdir()?;
    let mut wal = Wal::open(dir.path().join("wal.log"), codec(), false)?;
    wal.append(&put("old", 1, 1), WalOp::Insert)?;
    wal.truncate()?;
    wal.append(&put("new", 2, 2), WalOp::Insert)?;

    let entries = wal.read_all()?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].record.key, Value::from("new"));
    Ok(())
}

// -------------------- Truncated tail tolerance --------------------

#[test]
fn truncated_tail_after_valid_entries() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wal.log");
    {
        let mut wal = Wal::open(&path, codec(), true)?;
        wal.append(&put("k1", 1, 1), WalOp::Insert)?;
        wal.append(&put("k2", 2, 2), WalOp::Insert)?;
    }

    // Append half an entry, as a crash mid-write would leave it.
    let mut data = fs::read(&path)?;
    let partial = codec().encode_wal(&put("k3", 3, 3), 0)?;
    data.extend_from_slice(&partial[..partial.len() / 2]);
    fs::write(&path, &data)?;

    let mut wal = Wal::open(&path, codec(), false)?;
    let entries = wal.read_all()?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].record, put("k2", 2, 2));
    Ok(())
}

#[test]
fn open_cuts_torn_tail_so_later_appends_replay() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wal.log");
    {
        let mut wal = Wal::open(&path, codec(), true)?;
        wal.append(&put("k1", 1, 1), WalOp::Insert)?;
        wal.append(&put("k2", 2, 2), WalOp::Insert)?;
    }
    let mut data = fs::read(&path)?;
    data.extend_from_slice(b"WREC\x07\x00");
    fs::write(&path, &data)?;

    {
        let mut wal = Wal::open(&path, codec(), true)?;
        let expected = WAL_HEADER_LEN + 2 * codec().wal_entry_len() as u64;
        assert_eq!(fs::metadata(&path)?.len(), expected);
        assert_eq!(wal.read_all()?.len(), 2);
        wal.append(&put("k3", 3, 3), WalOp::Insert)?;
    }

    let mut wal = Wal::open(&path, codec(), false)?;
    let keys: Vec<Value> = wal.read_all()?.into_iter().map(|e| e.record.key).collect();
    assert_eq!(keys, vec![Value::from("k1"), Value::from("k2"), Value::from("k3")]);
    Ok(())
}

// -------------------- Corruption detection --------------------

#[test]
fn bad_delimiter_is_corruption() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wal.log");
    {
        let mut wal = Wal::open(&path, codec(), true)?;
        wal.append(&put("k1", 1, 1), WalOp::Insert)?;
        wal.append(&put("k2", 2, 2), WalOp::Insert)?;
    }

    let mut data = fs::read(&path)?;
    let second = WAL_HEADER_LEN as usize + codec().wal_entry_len();
    data[second] = b'X';
    fs::write(&path, &data)?;

    let mut wal = Wal::open(&path, codec(), false)?;
    match wal.read_all() {
        Err(WalError::Corrupt { offset, .. }) => assert_eq!(offset, second as u64),
        other => panic!("expected corruption, got {:?}", other),
    }
    Ok(())
}

#[test]
fn unknown_op_code_is_corruption() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wal.log");
    let mut data = b"WALF\n".to_vec();
    data.extend_from_slice(&codec().encode_wal(&put("k", 1, 1), 7)?);
    fs::write(&path, &data)?;

    let mut wal = Wal::open(&path, codec(), false)?;
    assert!(matches!(wal.read_all(), Err(WalError::Corrupt { .. })));
    Ok(())
}

#[test]
fn wrong_codec_is_corruption() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wal.log");
    {
        let mut wal = Wal::open(&path, codec(), true)?;
        wal.append(&put("k", 1, 1), WalOp::Insert)?;
    }
    // Same entry width, different key type.
    let other = RecordCodec::new(DataType::U64, DataType::I64);
    let mut wal = Wal::open(&path, other, false)?;
    assert!(matches!(wal.read_all(), Err(WalError::Corrupt { .. })));
    Ok(())
}

// -------------------- Failure handling --------------------

#[test]
fn append_type_mismatch_is_codec_error() -> Result<()> {
    let dir = tempdir()?;
    let mut wal = Wal::open(dir.path().join("wal.log"), codec(), false)?;
    let foreign = RecordCodec::new(DataType::U8, DataType::U8).record(1u8, 1u8, 1)?;
    assert!(matches!(
        wal.append(&foreign, WalOp::Insert),
        Err(WalError::Codec(_))
    ));
    Ok(())
}

#[test]
fn reopen_keeps_appending_in_order() -> Result<()> {
    let dir = tempdir()?;
    let mut wal = Wal::open(dir.path().join("wal.log"), codec(), false)?;
    wal.append(&put("a", 1, 1), WalOp::Insert)?;
    wal.sync()?;
    wal.reopen()?;
    wal.append(&put("b", 2, 2), WalOp::Insert)?;

    let keys: Vec<Value> = wal.read_all()?.into_iter().map(|e| e.record.key).collect();
    assert_eq!(keys, vec![Value::from("a"), Value::from("b")]);
    Ok(())
}

#[test]
fn reopen_writes_out_acknowledged_buffered_entries() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wal.log");
    let mut wal = Wal::open(&path, codec(), false)?;
    wal.append(&put("a", 1, 1), WalOp::Insert)?;
    wal.append(&put("b", 2, 2), WalOp::Insert)?;
    assert_eq!(fs::metadata(&path)?.len(), WAL_HEADER_LEN);

    wal.reopen()?;
    let expected = WAL_HEADER_LEN + 2 * codec().wal_entry_len() as u64;
    assert_eq!(fs::metadata(&path)?.len(), expected);
    assert_eq!(wal.read_all()?.len(), 2);
    Ok(())
}

#[test]
fn reopen_cuts_partial_entry_of_failed_write() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wal.log");
    let mut wal = Wal::open(&path, codec(), true)?;
    wal.append(&put("a", 1, 1), WalOp::Insert)?;

    // half an entry reached the disk before the write failed
    let partial = codec().encode_wal(&put("b", 2, 2), 0)?;
    let mut f = std::fs::OpenOptions::new().append(true).open(&path)?;
    f.write_all(&partial[..partial.len() / 2])?;
    drop(f);

    wal.reopen()?;
    wal.append(&put("c", 3, 3), WalOp::Insert)?;
    let keys: Vec<Value> = wal.read_all()?.into_iter().map(|e| e.record.key).collect();
    assert_eq!(keys, vec![Value::from("a"), Value::from("c")]);
    Ok(())
}

#[test]
fn failed_append_is_retried_once() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wal.log");
    let mut wal = Wal::open(&path, codec(), true)?;
    wal.append(&put("a", 1, 1), WalOp::Insert)?;

    // a read-only handle makes the next flush fail
    wal.writer = BufWriter::new(File::open(&path)?);
    wal.append(&put("b", 2, 2), WalOp::Insert)?;

    let keys: Vec<Value> = wal.read_all()?.into_iter().map(|e| e.record.key).collect();
    assert_eq!(keys, vec![Value::from("a"), Value::from("b")]);
    Ok(())
}

#[test]
fn append_fails_when_retry_cannot_reopen() -> Result<()> {
    let dir = tempdir()?;
    let sub = dir.path().join("store");
    fs::create_dir(&sub)?;
    let path = sub.join("wal.log");
    let mut wal = Wal::open(&path, codec(), true)?;

    wal.writer = BufWriter::new(File::open(&path)?);
    fs::remove_file(&path)?;
    fs::remove_dir(&sub)?;

    assert!(matches!(
        wal.append(&put("a", 1, 1), WalOp::Insert),
        Err(WalError::Io(_))
    ));
    Ok(())
}

// -------------------- Stress --------------------

#[test]
fn many_interleaved_entries_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    let mut wal = Wal::open(dir.path().join("wal.log"), codec(), false)?;
    for i in 0..5_000u64 {
        let key = format!("k{}", i % 500);
        if i % 3 == 0 {
            wal.append(&del(&key, i), WalOp::Delete)?;
        } else {
            wal.append(&put(&key, i as i64, i), WalOp::Insert)?;
        }
    }

    let entries = wal.read_all()?;
    assert_eq!(entries.len(), 5_000);
    for (i, e) in entries.iter().enumerate() {
        assert_eq!(e.record.timestamp, i as u64);
        assert_eq!(e.op == WalOp::Delete, i % 3 == 0);
    }
    Ok(())
}
