//! Integration tests for running a cache on a small descriptor budget

use std::rc::Rc;
use strata::buckets::Buckets;
use strata::cache::{Cache, Layout, PartitionKind};
use strata::info::Info;
use strata::pool::FilePool;
use strata::source::VecSource;
use tempfile::TempDir;

use crate::integration::{paths, rec, MTIME};

/// One record per owner per directory, interleaved so that every leaf is
/// written to and read from in turn.
fn interleaved(owners: usize, dirs: usize) -> Vec<strata::record::Record> {
    let mut records = Vec::new();
    for d in 0..dirs {
        for o in 0..owners {
            let path = format!("d{:03}/f{:03}", d, o);
            records.push(rec(&path, "-", &format!("user{:02}", o), 100, MTIME));
        }
    }
    records
}

#[test]
fn test_update_and_select_within_limit() {
    let temp = TempDir::new().unwrap();
    let pool = FilePool::with_limit(3);
    let records = interleaved(25, 8);
    let expected: Vec<String> = records.iter().map(|r| r.path().to_string()).collect();
    let cache = Cache::new(
        "pooled",
        temp.path().join("cache"),
        temp.path().join("deltas"),
        Layout::new(vec![PartitionKind::Owner], Buckets::default()),
        Box::new(VecSource::new(records)),
        Rc::clone(&pool),
    );

    cache.update().unwrap();
    assert!(pool.flush_count() > 1, "writers should have been flushed");
    assert!(pool.open_count() <= 3);

    let flushes = pool.flush_count();
    let mut stream = cache.select(None).unwrap();
    let mut seen = Vec::new();
    for record in stream.by_ref() {
        let record = record.unwrap();
        assert!(pool.open_count() <= 3);
        seen.push(record.path().to_string());
    }
    assert_eq!(seen, expected);
    assert!(pool.flush_count() > flushes, "readers should have been flushed");

    assert_eq!(cache.info(None).unwrap().total(), Info::new(200, 20_000));
}

#[test]
fn test_reopened_cache_on_tight_pool() {
    let temp = TempDir::new().unwrap();
    let records = interleaved(10, 3);
    let build = Cache::new(
        "pooled",
        temp.path().join("cache"),
        temp.path().join("deltas"),
        Layout::new(vec![PartitionKind::Owner], Buckets::default()),
        Box::new(VecSource::new(records)),
        FilePool::new(),
    );
    build.update().unwrap();

    let reopened = Cache::new(
        "pooled",
        temp.path().join("cache"),
        temp.path().join("deltas"),
        Layout::new(vec![PartitionKind::Owner], Buckets::default()),
        Box::new(VecSource::default()),
        FilePool::with_limit(1),
    );
    let all = paths(reopened.select(None).unwrap());
    assert_eq!(all.len(), 30);
    assert!(all.windows(2).all(|w| w[0] < w[1]));
}
