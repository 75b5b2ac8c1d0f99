//! Shared test utilities for integration tests
//!
//! Record and cache builders plus isolation of the config environment, so
//! tests never pick up a developer's own strata configuration.

use std::path::Path;
use std::sync::Mutex;
use strata::buckets::Buckets;
use strata::cache::{Cache, Layout, RecordStream, DEFAULT_PARTITIONS};
use strata::pool::FilePool;
use strata::record::Record;
use strata::source::VecSource;
use tempfile::TempDir;

/// Serializes tests that change process environment variables.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

pub const MTIME: i64 = 1_600_000_000;

pub fn rec(path: &str, dataset: &str, user: &str, size: u64, mtime: i64) -> Record {
    Record::new(path, dataset, user, "staff", size, mtime, "-rw-r--r--")
}

/// The three-file tree used throughout: two files in `a`, one in `b`.
pub fn sample_records() -> Vec<Record> {
    vec![
        rec("a/x.txt", "a", "alice", 5, MTIME),
        rec("a/y.txt", "a", "alice", 3000, MTIME),
        rec("b/z.txt", "b", "bob", 7, MTIME),
    ]
}

pub fn cache_at(root: &Path, records: Vec<Record>) -> Cache {
    Cache::new(
        "sample",
        root.join("cache"),
        root.join("deltas"),
        Layout::new(DEFAULT_PARTITIONS.to_vec(), Buckets::new(vec![1024])),
        Box::new(VecSource::new(records)),
        FilePool::new(),
    )
}

pub fn sample_cache(temp: &TempDir) -> Cache {
    cache_at(temp.path(), sample_records())
}

pub fn paths(stream: RecordStream) -> Vec<String> {
    stream.map(|r| r.unwrap().path().to_string()).collect()
}

/// Run `f` with `XDG_CONFIG_HOME` and `HOME` pointed into `test_dir`,
/// restoring both afterwards.
pub fn with_config_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let saved_home = std::env::var("HOME").ok();
    let saved_xdg = std::env::var("XDG_CONFIG_HOME").ok();

    std::env::set_var("HOME", test_dir.path());
    std::env::set_var("XDG_CONFIG_HOME", test_dir.path().join("xdg"));

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

    match saved_home {
        Some(v) => std::env::set_var("HOME", v),
        None => std::env::remove_var("HOME"),
    }
    match saved_xdg {
        Some(v) => std::env::set_var("XDG_CONFIG_HOME", v),
        None => std::env::remove_var("XDG_CONFIG_HOME"),
    }

    match result {
        Ok(r) => r,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
