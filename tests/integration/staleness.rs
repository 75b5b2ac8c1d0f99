//! Integration tests for discarding deltas older than the cache they annotate

use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};
use strata::info::Info;
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::integration::{paths, sample_cache};

fn age_deltas(delta_dir: &Path) {
    let old = SystemTime::now() - Duration::from_secs(365 * 24 * 60 * 60);
    for entry in WalkDir::new(delta_dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            let file = File::options().write(true).open(entry.path()).unwrap();
            file.set_modified(old).unwrap();
        }
    }
}

#[test]
fn test_stale_deltas_are_ignored() {
    let temp = TempDir::new().unwrap();
    let cache = sample_cache(&temp);
    cache.update().unwrap();
    let x = cache.select(None).unwrap().next().unwrap().unwrap();
    cache.delete(&x).unwrap();
    cache.save_deletions().unwrap();

    age_deltas(&temp.path().join("deltas"));

    let reopened = sample_cache(&temp);
    assert_eq!(reopened.info(None).unwrap().total(), Info::new(3, 3012));
    assert_eq!(
        paths(reopened.select(None).unwrap()),
        vec!["a/x.txt", "a/y.txt", "b/z.txt"]
    );
    assert!(
        !temp.path().join("deltas/deleted.info").exists(),
        "stale root delta should be removed"
    );
}

#[test]
fn test_fresh_deltas_are_applied() {
    let temp = TempDir::new().unwrap();
    let cache = sample_cache(&temp);
    cache.update().unwrap();
    let x = cache.select(None).unwrap().next().unwrap().unwrap();
    cache.delete(&x).unwrap();
    cache.save_deletions().unwrap();

    let reopened = sample_cache(&temp);
    assert_eq!(reopened.info(None).unwrap().total(), Info::new(2, 3007));
    assert!(temp.path().join("deltas/deleted.info").exists());
}
