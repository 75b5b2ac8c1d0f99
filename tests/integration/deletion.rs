//! Integration tests for recording deletions in delta files

use strata::error::CacheError;
use strata::filter::Filter;
use strata::format::week_of;
use strata::info::Info;
use tempfile::TempDir;

use crate::integration::{paths, rec, sample_cache, MTIME};

#[test]
fn test_delete_nets_out_of_aggregates() {
    let temp = TempDir::new().unwrap();
    let cache = sample_cache(&temp);
    cache.update().unwrap();

    let x = cache
        .select(None)
        .unwrap()
        .map(Result::unwrap)
        .find(|r| r.path() == "a/x.txt")
        .unwrap();
    assert!(cache.delete(&x).unwrap());
    assert!(!cache.delete(&x).unwrap(), "second delete is a no-op");

    assert_eq!(cache.info(None).unwrap().total(), Info::new(2, 3007));
    assert_eq!(
        cache.info(Some(&Filter::dataset("a"))).unwrap().total(),
        Info::new(1, 3000)
    );
    assert_eq!(paths(cache.select(None).unwrap()), vec!["a/y.txt", "b/z.txt"]);

    let all: Vec<String> = cache
        .select_including_deleted(None)
        .unwrap()
        .map(|r| r.unwrap().path().to_string())
        .collect();
    assert_eq!(all, vec!["a/x.txt", "a/y.txt", "b/z.txt"]);
}

#[test]
fn test_saved_deletions_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let cache = sample_cache(&temp);
    cache.update().unwrap();
    let x = cache.select(None).unwrap().next().unwrap().unwrap();
    cache.delete(&x).unwrap();

    // root, week, owner, size and dataset levels
    assert_eq!(cache.save_deletions().unwrap(), 5);
    assert_eq!(cache.save_deletions().unwrap(), 0);

    let leaf_delta = temp
        .path()
        .join("deltas")
        .join(format!("_{}", week_of(MTIME)))
        .join("_alice/_0/_a");
    let deleted = std::fs::read_to_string(leaf_delta.join("deleted.filelist")).unwrap();
    assert_eq!(deleted, "a/x.txt\n");
    assert!(temp.path().join("deltas/deleted.info").is_file());

    let reopened = sample_cache(&temp);
    assert_eq!(reopened.info(None).unwrap().total(), Info::new(2, 3007));
    assert_eq!(
        paths(reopened.select(None).unwrap()),
        vec!["a/y.txt", "b/z.txt"]
    );
}

#[test]
fn test_deletions_accumulate_across_sessions() {
    let temp = TempDir::new().unwrap();
    let first = sample_cache(&temp);
    first.update().unwrap();
    let x = first.select(None).unwrap().next().unwrap().unwrap();
    first.delete(&x).unwrap();
    first.save_deletions().unwrap();

    let second = sample_cache(&temp);
    let z = second
        .select(Some(&Filter::owner("bob")))
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    second.delete(&z).unwrap();
    second.save_deletions().unwrap();

    let third = sample_cache(&temp);
    assert_eq!(third.info(None).unwrap().total(), Info::new(1, 3000));
    assert_eq!(paths(third.select(None).unwrap()), vec!["a/y.txt"]);
}

#[test]
fn test_update_discards_deletions() {
    let temp = TempDir::new().unwrap();
    let cache = sample_cache(&temp);
    cache.update().unwrap();
    let x = cache.select(None).unwrap().next().unwrap().unwrap();
    cache.delete(&x).unwrap();
    cache.save_deletions().unwrap();

    cache.update().unwrap();
    assert_eq!(cache.info(None).unwrap().total(), Info::new(3, 3012));
}

#[test]
fn test_foreign_record_is_rejected() {
    let temp = TempDir::new().unwrap();
    let cache = sample_cache(&temp);
    cache.update().unwrap();
    let unattached = rec("a/x.txt", "a", "alice", 5, MTIME);
    assert!(matches!(
        cache.delete(&unattached),
        Err(CacheError::ForeignRecord(_))
    ));

    let other_temp = TempDir::new().unwrap();
    let other = sample_cache(&other_temp);
    other.update().unwrap();
    let theirs = other.select(None).unwrap().next().unwrap().unwrap();
    assert!(matches!(cache.delete(&theirs), Err(CacheError::ForeignRecord(_))));
}
