//! Filesystem walker producing records for a directory tree

use super::{RecordIter, RecordSource};
use crate::error::CacheError;
use crate::record::{Record, NO_DATASET};
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Walker configuration
#[derive(Debug, Clone, Default)]
pub struct WalkerConfig {
    /// Whether to follow symbolic links
    pub follow_symlinks: bool,
    /// Entry names to skip, along with everything below them
    pub ignore_patterns: Vec<String>,
    /// Maximum depth to traverse (None = unlimited)
    pub max_depth: Option<usize>,
}

type DatasetFn = Box<dyn Fn(&str) -> String>;

/// Source walking a directory tree. Owners and groups are numeric ids; name
/// resolution is left to whoever displays them.
pub struct WalkSource {
    root: PathBuf,
    config: WalkerConfig,
    dataset: Option<DatasetFn>,
}

/// `ls -l` style mode string, e.g. `drwxr-xr-x`.
pub fn filemode(mode: u32) -> String {
    let kind = match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFDIR as u32 => 'd',
        m if m == libc::S_IFLNK as u32 => 'l',
        m if m == libc::S_IFCHR as u32 => 'c',
        m if m == libc::S_IFBLK as u32 => 'b',
        m if m == libc::S_IFIFO as u32 => 'p',
        m if m == libc::S_IFSOCK as u32 => 's',
        _ => '-',
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    let bit = |mask: u32, c: char| if mode & mask != 0 { c } else { '-' };
    // special bits replace the matching execute slot
    let exec = |x: u32, special: u32, set: char, unset: char| match (mode & x != 0, mode & special != 0) {
        (true, true) => set,
        (false, true) => unset,
        (true, false) => 'x',
        (false, false) => '-',
    };
    out.push(bit(0o400, 'r'));
    out.push(bit(0o200, 'w'));
    out.push(exec(0o100, 0o4000, 's', 'S'));
    out.push(bit(0o040, 'r'));
    out.push(bit(0o020, 'w'));
    out.push(exec(0o010, 0o2000, 's', 'S'));
    out.push(bit(0o004, 'r'));
    out.push(bit(0o002, 'w'));
    out.push(exec(0o001, 0o1000, 't', 'T'));
    out
}

impl WalkSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: WalkerConfig::default(),
            dataset: None,
        }
    }

    pub fn with_config(mut self, config: WalkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Tag each record with a dataset derived from its relative path.
    pub fn with_dataset_fn(mut self, f: impl Fn(&str) -> String + 'static) -> Self {
        self.dataset = Some(Box::new(f));
        self
    }

    /// Dataset is the first `depth` components of the relative path;
    /// shallower entries get no dataset.
    pub fn with_dataset_depth(self, depth: usize) -> Self {
        self.with_dataset_fn(move |path| {
            let parts: Vec<&str> = path.split('/').take(depth + 1).collect();
            if depth == 0 || parts.len() <= depth {
                NO_DATASET.to_string()
            } else {
                parts[..depth].join("/")
            }
        })
    }

    fn should_ignore(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        self.config.ignore_patterns.iter().any(|p| *p == name)
    }

    fn record(&self, relative: String, meta: &Metadata) -> Record {
        let dataset = match &self.dataset {
            Some(f) => f(&relative),
            None => NO_DATASET.to_string(),
        };
        Record::new(
            relative,
            dataset,
            meta.uid().to_string(),
            meta.gid().to_string(),
            meta.len(),
            meta.mtime(),
            filemode(meta.mode()),
        )
    }

    /// Walk the tree, collecting records sorted by relative path. Entries
    /// that cannot be read are logged and skipped.
    pub fn walk(&self) -> Result<Vec<Record>, CacheError> {
        if !self.root.is_dir() {
            return Err(CacheError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("source directory {} not found", self.root.display()),
            )));
        }
        let walker = WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .max_depth(self.config.max_depth.unwrap_or(usize::MAX))
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !self.should_ignore(e));

        let mut records = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel.to_string_lossy().into_owned(),
                Err(_) => continue,
            };
            if relative.contains('\n') {
                warn!(path = %entry.path().display(), "skipping path containing a newline");
                continue;
            }
            match entry.metadata() {
                Ok(meta) => records.push(self.record(relative, &meta)),
                Err(e) => warn!(path = %entry.path().display(), error = %e, "cannot stat entry"),
            }
        }
        // byte order of the whole path, not per-component
        records.sort_by(|a, b| a.path().cmp(b.path()));
        debug!(root = %self.root.display(), records = records.len(), "walk complete");
        Ok(records)
    }
}

impl RecordSource for WalkSource {
    fn describe(&self) -> String {
        let root = dunce::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        root.display().to_string()
    }

    fn root(&self) -> Option<&Path> {
        Some(&self.root)
    }

    fn records(&self) -> Result<RecordIter<'_>, CacheError> {
        Ok(Box::new(self.walk()?.into_iter().map(Ok)))
    }
}
