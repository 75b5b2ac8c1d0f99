//! Integration tests for building and querying a partitioned cache

use strata::cache::UpdateOutcome;
use strata::error::CacheError;
use strata::filter::Filter;
use strata::format::week_of;
use strata::info::Info;
use tempfile::TempDir;

use crate::integration::{cache_at, paths, rec, sample_cache, MTIME};

#[test]
fn test_update_writes_partition_tree() {
    let temp = TempDir::new().unwrap();
    let cache = sample_cache(&temp);
    assert_eq!(cache.update().unwrap(), UpdateOutcome::Updated { records: 3 });

    let week = temp.path().join("cache").join(format!("_{}", week_of(MTIME)));
    assert!(temp.path().join("cache/info").is_file());
    assert!(week.join("info").is_file());
    assert!(week.join("_alice/_0/_a/filelist").is_file());
    assert!(week.join("_alice/_1024/_a/filelist").is_file());
    assert!(week.join("_bob/_0/_b/filelist").is_file());
    assert!(!week.join("_bob/_1024").exists());

    let small = std::fs::read_to_string(week.join("_alice/_0/_a/filelist")).unwrap();
    assert_eq!(small.lines().count(), 1);
    assert!(small.trim_end().ends_with("a/x.txt"));
}

#[test]
fn test_size_filter_selects_large_file() {
    let temp = TempDir::new().unwrap();
    let cache = sample_cache(&temp);
    cache.update().unwrap();

    let big = Filter::size_geq(1024);
    assert_eq!(paths(cache.select(Some(&big)).unwrap()), vec!["a/y.txt"]);
    assert_eq!(cache.info(None).unwrap().total(), Info::new(3, 3012));
    assert_eq!(cache.info(Some(&big)).unwrap().total(), Info::new(1, 3000));
}

#[test]
fn test_owner_and_dataset_filters() {
    let temp = TempDir::new().unwrap();
    let cache = sample_cache(&temp);
    cache.update().unwrap();

    assert_eq!(
        paths(cache.select(Some(&Filter::dataset("a"))).unwrap()),
        vec!["a/x.txt", "a/y.txt"]
    );
    assert_eq!(
        paths(cache.select(Some(&Filter::owner("bob"))).unwrap()),
        vec!["b/z.txt"]
    );
    let none = Filter::owner("bob").intersect(&Filter::dataset("a"));
    assert!(paths(cache.select(Some(&none)).unwrap()).is_empty());

    let info = cache.info(None).unwrap();
    assert_eq!(info.users()["alice"], Info::new(2, 3005));
    assert_eq!(info.datasets()["b"], Info::new(1, 7));
}

#[test]
fn test_mtime_and_path_filters() {
    let temp = TempDir::new().unwrap();
    let records = vec![
        rec("old/1", "old", "alice", 10, MTIME - 90 * 86_400),
        rec("old/2", "old", "alice", 20, MTIME - 60 * 86_400),
        rec("new/1", "new", "alice", 30, MTIME),
        rec("new/skip.tmp", "new", "alice", 40, MTIME),
    ];
    let cache = cache_at(temp.path(), records);
    cache.update().unwrap();

    let older = Filter::modified_before(MTIME - 30 * 86_400);
    assert_eq!(paths(cache.select(Some(&older)).unwrap()), vec!["old/1", "old/2"]);
    assert_eq!(cache.info(Some(&older)).unwrap().total(), Info::new(2, 30));

    let recent = Filter::modified_since(MTIME - 86_400)
        .intersect(&Filter::excluding("*.tmp").unwrap());
    assert_eq!(paths(cache.select(Some(&recent)).unwrap()), vec!["new/1"]);

    let re = Filter::matching("^old/").unwrap();
    assert_eq!(cache.info(Some(&re)).unwrap().total(), Info::new(2, 30));
}

#[test]
fn test_reopened_cache_reads_from_disk() {
    let temp = TempDir::new().unwrap();
    sample_cache(&temp).update().unwrap();

    let reopened = cache_at(temp.path(), vec![]);
    assert_eq!(
        paths(reopened.select(None).unwrap()),
        vec!["a/x.txt", "a/y.txt", "b/z.txt"]
    );
    assert_eq!(reopened.info(None).unwrap().total(), Info::new(3, 3012));
}

#[test]
fn test_update_replaces_previous_contents() {
    let temp = TempDir::new().unwrap();
    sample_cache(&temp).update().unwrap();

    let rebuilt = cache_at(temp.path(), vec![rec("c/w.txt", "c", "carol", 1, MTIME)]);
    rebuilt.update().unwrap();
    assert_eq!(paths(rebuilt.select(None).unwrap()), vec!["c/w.txt"]);
    let week = temp.path().join("cache").join(format!("_{}", week_of(MTIME)));
    assert!(!week.join("_alice").exists());
}

#[test]
fn test_query_before_update_is_missing_cache() {
    let temp = TempDir::new().unwrap();
    let cache = sample_cache(&temp);
    assert!(matches!(cache.info(None), Err(CacheError::MissingCache(_))));
}
