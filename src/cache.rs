//! Partitioned metadata cache
//!
//! A [`Cache`] stores the records of one source under a directory tree, one
//! level per configured [`PartitionKind`], with a sorted flat file in every
//! leaf and an aggregate `info` file in every node. Queries prune whole
//! partitions that cannot match and merge the rest back into one
//! path-ordered stream. Deletions are kept in a parallel delta directory and
//! netted out of aggregates until the next full update.

mod leaf;
pub mod partition;
mod stream;
mod tree;

pub use partition::{Layout, PartitionKey, PartitionKind, DEFAULT_PARTITIONS};
pub use stream::RecordStream;
pub use tree::NodeId;

use crate::buckets::Buckets;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::filter::Filter;
use crate::format::time_to_string;
use crate::info::InfoAccumulator;
use crate::pool::FilePool;
use crate::record::Record;
use crate::source::{RecordSource, WalkSource, WalkerConfig};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};
use tree::{Tree, ROOT};

pub(crate) const FILELIST: &str = "filelist";
pub(crate) const INFO: &str = "info";
pub(crate) const DELETED_FILELIST: &str = "deleted.filelist";
pub(crate) const DELETED_INFO: &str = "deleted.info";

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated { records: u64 },
    /// The cache directory belongs to someone else.
    Skipped,
}

pub struct Cache {
    name: String,
    id: u64,
    path: PathBuf,
    delta_dir: PathBuf,
    layout: Rc<Layout>,
    source: Box<dyn RecordSource>,
    pool: Rc<FilePool>,
    tree: RefCell<Option<Rc<RefCell<Tree>>>>,
}

impl Cache {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        delta_dir: impl Into<PathBuf>,
        layout: Layout,
        source: Box<dyn RecordSource>,
        pool: Rc<FilePool>,
    ) -> Self {
        Cache {
            name: name.into(),
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            path: path.into(),
            delta_dir: delta_dir.into(),
            layout: Rc::new(layout),
            source,
            pool,
            tree: RefCell::new(None),
        }
    }

    /// Cache over a directory walk, as described by configuration.
    pub fn from_config(
        name: &str,
        config: &CacheConfig,
        pool: Rc<FilePool>,
    ) -> Result<Self, CacheError> {
        config.validate(name)?;
        let layout = Layout::from_names(&config.partitions, &config.size_buckets)?;
        let mut source = WalkSource::new(&config.source).with_config(WalkerConfig {
            ignore_patterns: config.ignore.clone(),
            ..Default::default()
        });
        if let Some(depth) = config.dataset_depth {
            source = source.with_dataset_depth(depth);
        }
        Ok(Cache::new(
            name,
            &config.path,
            &config.delta_dir,
            layout,
            Box::new(source),
            pool,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn delta_dir(&self) -> &Path {
        &self.delta_dir
    }

    pub fn source(&self) -> &dyn RecordSource {
        self.source.as_ref()
    }

    pub fn buckets(&self) -> Rc<Buckets> {
        Rc::clone(&self.layout.buckets)
    }

    pub fn partitions(&self) -> &[PartitionKind] {
        &self.layout.kinds
    }

    pub fn pool(&self) -> &Rc<FilePool> {
        &self.pool
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Whether `record` was read from this cache.
    pub fn owns(&self, record: &Record) -> bool {
        record.origin().map_or(false, |o| o.cache == self.id)
    }

    /// Source description plus when the cache was last built.
    pub fn describe(&self) -> String {
        let built = fs::metadata(self.path.join(INFO))
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| time_to_string(d.as_secs() as i64));
        match built {
            Some(t) => format!("{} cached {}", self.source.describe(), t),
            None => format!("{} <missing-cache>", self.source.describe()),
        }
    }

    fn tree(&self) -> Result<Rc<RefCell<Tree>>, CacheError> {
        if let Some(tree) = self.tree.borrow().as_ref() {
            return Ok(Rc::clone(tree));
        }
        if !self.exists() {
            return Err(CacheError::MissingCache(format!(
                "{} ({})",
                self.name,
                self.path.display()
            )));
        }
        let tree = Rc::new(RefCell::new(self.new_tree()));
        *self.tree.borrow_mut() = Some(Rc::clone(&tree));
        Ok(tree)
    }

    fn new_tree(&self) -> Tree {
        Tree::new(
            self.id,
            &self.path,
            &self.delta_dir,
            Rc::clone(&self.layout),
            Rc::clone(&self.pool),
        )
    }

    /// Rebuild the cache from one pass over its source.
    pub fn update(&self) -> Result<UpdateOutcome, CacheError> {
        info!(cache = %self.name, source = %self.source.describe(), "updating cache");
        let mut tree = self.new_tree();
        match self.rebuild(&mut tree) {
            Ok(records) => {
                info!(cache = %self.name, records, nodes = tree.len(), "cache updated");
                *self.tree.borrow_mut() = Some(Rc::new(RefCell::new(tree)));
                Ok(UpdateOutcome::Updated { records })
            }
            Err(e) if e.is_permission_denied() => {
                warn!(cache = %self.name, error = %e, "no permission to update cache, skipping");
                Ok(UpdateOutcome::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    fn rebuild(&self, tree: &mut Tree) -> Result<u64, CacheError> {
        tree.create(ROOT)?;
        let mut count = 0;
        let mut last: Option<String> = None;
        let mut warned = false;
        for record in self.source.records()? {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!(cache = %self.name, error = %e, "skipping unreadable source entry");
                    continue;
                }
            };
            if let Some(prev) = &last {
                if record.path() < prev.as_str() && !warned {
                    warn!(cache = %self.name, path = record.path(), "source is not sorted by path");
                    warned = true;
                }
            }
            tree.add(ROOT, &record)?;
            last = Some(record.path().to_string());
            count += 1;
        }
        self.pool.flush_all()?;
        tree.finalize(ROOT)?;
        Ok(count)
    }

    /// Records matching `filter`, in path order.
    pub fn select(&self, filter: Option<&Filter>) -> Result<RecordStream, CacheError> {
        self.select_inner(filter, false)
    }

    /// Like [`select`](Self::select) but also yields deleted records.
    pub fn select_including_deleted(
        &self,
        filter: Option<&Filter>,
    ) -> Result<RecordStream, CacheError> {
        self.select_inner(filter, true)
    }

    fn select_inner(
        &self,
        filter: Option<&Filter>,
        include_deleted: bool,
    ) -> Result<RecordStream, CacheError> {
        let tree = self.tree()?;
        let filter = filter.filter(|f| !f.is_empty()).cloned();
        Ok(stream::select(&tree, ROOT, filter, include_deleted))
    }

    /// Add the aggregate of records matching `filter` to `acc`.
    pub fn merge_info(
        &self,
        acc: &mut InfoAccumulator,
        filter: Option<&Filter>,
    ) -> Result<(), CacheError> {
        let tree = self.tree()?;
        let filter = filter.filter(|f| !f.is_empty());
        let mut tree = tree.borrow_mut();
        tree.merge_info(ROOT, acc, filter)
    }

    pub fn info(&self, filter: Option<&Filter>) -> Result<InfoAccumulator, CacheError> {
        let mut acc = InfoAccumulator::new(self.buckets());
        self.merge_info(&mut acc, filter)?;
        Ok(acc)
    }

    /// Note that a record read from this cache no longer exists. Returns
    /// false if it had already been deleted.
    pub fn delete(&self, record: &Record) -> Result<bool, CacheError> {
        let tree = self.tree()?;
        let mut tree = tree.borrow_mut();
        tree.delete(record)
    }

    /// Persist deletions made since the last save; a no-op when there are
    /// none.
    pub fn save_deletions(&self) -> Result<usize, CacheError> {
        let tree = match self.tree.borrow().as_ref() {
            Some(tree) => Rc::clone(tree),
            None => return Ok(0),
        };
        let mut tree = tree.borrow_mut();
        if !tree.has_pending() {
            return Ok(0);
        }
        tree.save_deletions()
    }
}
