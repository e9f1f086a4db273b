use super::*;
use record::Value;
use tempfile::tempdir;

type Source = std::vec::IntoIter<Result<Record>>;

fn source(items: &[(u32, &str, u64)]) -> Result<Source> {
    Ok(records(items)?
        .into_iter()
        .map(Ok)
        .collect::<Vec<_>>()
        .into_iter())
}

fn keys(out: &[Record]) -> Vec<u32> {
    out.iter()
        .map(|r| match r.key {
            Value::U32(k) => k,
            ref other => panic!("unexpected key {}", other),
        })
        .collect()
}

// -------------------- Basic merge --------------------

#[test]
fn merge_single_source() -> Result<()> {
    let out = MergeIterator::new(vec![source(&[(1, "a", 1), (2, "b", 1), (3, "c", 1)])?])
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(keys(&out), vec![1, 2, 3]);
    Ok(())
}

#[test]
fn merge_interleaved_with_overlap() -> Result<()> {
    let older = source(&[(1, "a1", 1), (3, "c1", 1), (5, "e1", 1)])?;
    let newer = source(&[(2, "b2", 2), (3, "c2", 2), (4, "d2", 2)])?;
    let out = MergeIterator::new(vec![older, newer]).collect::<Result<Vec<_>>>()?;

    assert_eq!(keys(&out), vec![1, 2, 3, 4, 5]);
    assert_eq!(out[2].value, Value::from("c2"));
    Ok(())
}

#[test]
fn merge_empty_sources() -> Result<()> {
    let out = MergeIterator::new(vec![source(&[])?, source(&[(7, "x", 1)])?, source(&[])?])
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(keys(&out), vec![7]);

    let none: Vec<Source> = Vec::new();
    assert_eq!(MergeIterator::new(none).count(), 0);
    Ok(())
}

// -------------------- Conflict resolution --------------------

#[test]
fn higher_timestamp_wins_regardless_of_source() -> Result<()> {
    // the older file holds the newer write
    let older = source(&[(1, "new", 9)])?;
    let newer = source(&[(1, "old", 3)])?;
    let out = MergeIterator::new(vec![older, newer]).collect::<Result<Vec<_>>>()?;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].value, Value::from("new"));
    assert_eq!(out[0].timestamp, 9);
    Ok(())
}

#[test]
fn timestamp_tie_goes_to_later_source() -> Result<()> {
    let a = source(&[(1, "a", 4)])?;
    let b = source(&[(1, "b", 4)])?;
    let c = source(&[(1, "c", 4)])?;
    let out = MergeIterator::new(vec![a, b, c]).collect::<Result<Vec<_>>>()?;
    assert_eq!(out[0].value, Value::from("c"));
    Ok(())
}

#[test]
fn winning_tombstone_is_dropped() -> Result<()> {
    let c = codec();
    let older = source(&[(1, "a", 1), (2, "b", 1), (3, "c", 1)])?;
    let newer = vec![Ok(c.tombstone(2u32, 5)?), Ok(c.tombstone(9u32, 5)?)].into_iter();
    let out = MergeIterator::new(vec![older, newer]).collect::<Result<Vec<_>>>()?;
    assert_eq!(keys(&out), vec![1, 3]);
    Ok(())
}

#[test]
fn kept_tombstone_replaces_older_value() -> Result<()> {
    let c = codec();
    let older = source(&[(1, "a", 1), (2, "b", 1)])?;
    let newer = vec![Ok(c.tombstone(2u32, 5)?)].into_iter();
    let out = MergeIterator::new(vec![older, newer])
        .keep_tombstones()
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(keys(&out), vec![1, 2]);
    assert!(out[1].tombstone);
    assert_eq!(out[1].timestamp, 5);
    Ok(())
}

#[test]
fn older_tombstone_loses_to_newer_write() -> Result<()> {
    let c = codec();
    let older = vec![Ok(c.tombstone(2u32, 1)?)].into_iter();
    let newer = source(&[(2, "back", 2)])?;
    let out = MergeIterator::new(vec![older, newer]).collect::<Result<Vec<_>>>()?;
    assert_eq!(keys(&out), vec![2]);
    assert!(!out[0].tombstone);
    Ok(())
}

// -------------------- Errors --------------------

#[test]
fn source_error_ends_merge() -> Result<()> {
    let good = source(&[(1, "a", 1), (5, "e", 1)])?;
    let bad = vec![
        Ok(codec().record(2u32, "b", 1)?),
        Err(anyhow::anyhow!("disk on fire")),
        Ok(codec().record(4u32, "d", 1)?),
    ]
    .into_iter();
    let items: Vec<_> = MergeIterator::new(vec![good, bad]).collect();
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(items[1].is_err());
    Ok(())
}

// -------------------- Over tables --------------------

#[test]
fn merge_table_cursors() -> Result<()> {
    let dir = tempdir()?;
    let a = write_table(dir.path(), "1.sst", &records(&[(1, "a", 1), (3, "c", 1), (5, "e", 1)])?, opts(2))?;
    let b = write_table(dir.path(), "2.sst", &records(&[(2, "b", 2), (3, "C", 2), (4, "d", 2)])?, opts(2))?;
    let ra = SstReader::open(&a, codec(), opts(2))?;
    let rb = SstReader::open(&b, codec(), opts(2))?;

    let out = MergeIterator::new(vec![ra.cursor()?, rb.cursor()?]).collect::<Result<Vec<_>>>()?;
    assert_eq!(keys(&out), vec![1, 2, 3, 4, 5]);
    assert_eq!(out[2].value, Value::from("C"));
    Ok(())
}
