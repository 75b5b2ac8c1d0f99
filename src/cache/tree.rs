//! Arena of cache nodes
//!
//! Nodes live in one `Vec` and refer to each other by [`NodeId`]. A partition
//! node's children sit in an ordered map whose entries start out
//! [`Child::Unrealized`] (known from a directory listing) and become
//! [`Child::Realized`] the first time a query or an update touches them.

use super::leaf::Leaf;
use super::partition::{Layout, PartitionKey, PartitionKind, PARTITION_PREFIX};
use super::{DELETED_FILELIST, DELETED_INFO, FILELIST, INFO};
use crate::error::CacheError;
use crate::filter::Filter;
use crate::info::{InfoAccumulator, Selector};
use crate::pool::FilePool;
use crate::record::{Origin, Record};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Index of a node within its cache's tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

pub(crate) const ROOT: NodeId = NodeId(0);

enum Child {
    Unrealized,
    Realized(NodeId),
}

struct Partition {
    kind: PartitionKind,
    children: BTreeMap<PartitionKey, Child>,
    /// Whether the directory listing has been merged into `children`.
    listed: bool,
}

enum Body {
    Partition(Partition),
    Leaf(Leaf),
}

struct Node {
    path: PathBuf,
    delta_dir: PathBuf,
    selector: Selector,
    parent: Option<NodeId>,
    level: usize,
    /// Persisted aggregate, or the running one during an update.
    info: Option<InfoAccumulator>,
    info_loaded: bool,
    /// Aggregate of records deleted since the last rebuild.
    deleted_info: InfoAccumulator,
    body: Body,
}

impl Node {
    /// File a delta is compared against to decide staleness.
    fn main_file(&self) -> PathBuf {
        match self.body {
            Body::Leaf(_) => self.path.join(FILELIST),
            Body::Partition(_) => self.path.join(INFO),
        }
    }
}

/// True when `delta` was written before the current `main` file.
fn is_stale(delta: &Path, main: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified());
    match (modified(delta), modified(main)) {
        (Ok(d), Ok(m)) => d < m,
        _ => false,
    }
}

pub(crate) struct Tree {
    cache_id: u64,
    nodes: Vec<Node>,
    layout: Rc<Layout>,
    pool: Rc<FilePool>,
    /// Nodes holding deletions not yet written to their delta directory.
    pending: BTreeSet<NodeId>,
}

impl Tree {
    pub(crate) fn new(
        cache_id: u64,
        path: &Path,
        delta_dir: &Path,
        layout: Rc<Layout>,
        pool: Rc<FilePool>,
    ) -> Self {
        let mut tree = Tree {
            cache_id,
            nodes: Vec::new(),
            layout,
            pool,
            pending: BTreeSet::new(),
        };
        let root = tree.new_node(
            path.to_path_buf(),
            delta_dir.to_path_buf(),
            Selector::default(),
            None,
            0,
        );
        tree.nodes.push(root);
        tree
    }

    fn new_node(
        &self,
        path: PathBuf,
        delta_dir: PathBuf,
        selector: Selector,
        parent: Option<NodeId>,
        level: usize,
    ) -> Node {
        let body = match self.layout.kinds.get(level) {
            Some(kind) => Body::Partition(Partition {
                kind: *kind,
                children: BTreeMap::new(),
                listed: false,
            }),
            None => Body::Leaf(Leaf::default()),
        };
        Node {
            path,
            delta_dir,
            selector,
            parent,
            level,
            info: None,
            info_loaded: false,
            deleted_info: self.empty_info(),
            body,
        }
    }

    fn empty_info(&self) -> InfoAccumulator {
        InfoAccumulator::new(Rc::clone(&self.layout.buckets))
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_leaf(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].body, Body::Leaf(_))
    }

    fn realized_children(&self, id: NodeId) -> Vec<NodeId> {
        match &self.nodes[id.0].body {
            Body::Partition(p) => p
                .children
                .values()
                .filter_map(|c| match c {
                    Child::Realized(n) => Some(*n),
                    Child::Unrealized => None,
                })
                .collect(),
            Body::Leaf(_) => Vec::new(),
        }
    }

    /// Merge the directory listing into the child map, once.
    fn ensure_listed(&mut self, id: NodeId) {
        let node = &self.nodes[id.0];
        let kind = match &node.body {
            Body::Partition(p) if !p.listed => p.kind,
            _ => return,
        };
        let names = match self.pool.read_dir(&node.path) {
            Ok(names) => names,
            Err(e) => {
                warn!(path = %node.path.display(), error = %e, "cannot list cache partition");
                Vec::new()
            }
        };
        if let Body::Partition(p) = &mut self.nodes[id.0].body {
            p.listed = true;
            for name in names {
                if let Some(key) = kind.parse_dir_name(&name, &self.layout.buckets) {
                    p.children.entry(key).or_insert(Child::Unrealized);
                }
            }
        }
    }

    /// Child for `key`, creating its node if needed. `None` for leaves.
    fn realize(&mut self, parent: NodeId, key: &PartitionKey) -> Option<NodeId> {
        let kind = match &self.nodes[parent.0].body {
            Body::Partition(p) => {
                if let Some(Child::Realized(child)) = p.children.get(key) {
                    return Some(*child);
                }
                p.kind
            }
            Body::Leaf(_) => return None,
        };
        let p = &self.nodes[parent.0];
        let dir = kind.dir_name(key, &self.layout.buckets);
        let child = self.new_node(
            p.path.join(&dir),
            p.delta_dir.join(&dir),
            kind.narrow(&p.selector, key),
            Some(parent),
            p.level + 1,
        );
        trace!(path = %child.path.display(), selector = ?child.selector, "realizing partition");
        let id = NodeId(self.nodes.len());
        self.nodes.push(child);
        if let Body::Partition(p) = &mut self.nodes[parent.0].body {
            p.children.insert(key.clone(), Child::Realized(id));
        }
        Some(id)
    }

    /// Children that may hold records matching `filter`, each paired with
    /// the residual filter to apply below it.
    pub(crate) fn filtered(
        &mut self,
        id: NodeId,
        filter: Option<&Filter>,
    ) -> Vec<(NodeId, Option<Filter>)> {
        self.ensure_listed(id);
        let (kind, keys) = match &self.nodes[id.0].body {
            Body::Partition(p) => (p.kind, p.children.keys().cloned().collect::<Vec<_>>()),
            Body::Leaf(_) => return Vec::new(),
        };
        let mut out = Vec::new();
        for key in keys {
            if let Some(residual) = kind.admit(&key, filter, &self.layout.buckets) {
                if let Some(child) = self.realize(id, &key) {
                    out.push((child, residual));
                }
            }
        }
        out
    }

    /// Empty out a node's directory, keeping anything that is not ours.
    pub(crate) fn create(&mut self, id: NodeId) -> Result<(), CacheError> {
        let leaf = self.is_leaf(id);
        let path = self.nodes[id.0].path.clone();
        if path.is_dir() {
            for entry in fs::read_dir(&path)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let ours_file = name == INFO || name.ends_with(".tmp") || (leaf && name == FILELIST);
                let ours_dir = !leaf && name.starts_with(PARTITION_PREFIX);
                if ours_file {
                    fs::remove_file(entry.path())?;
                } else if ours_dir && entry.file_type()?.is_dir() {
                    fs::remove_dir_all(entry.path())?;
                } else {
                    warn!(path = %entry.path().display(), "leaving unexpected entry in cache directory");
                }
            }
        } else {
            fs::create_dir_all(&path)?;
        }

        let fresh = self.empty_info();
        let node = &mut self.nodes[id.0];
        node.info = Some(fresh.clone());
        node.info_loaded = true;
        node.deleted_info = fresh;
        match &mut node.body {
            Body::Partition(p) => {
                p.children.clear();
                p.listed = true;
            }
            Body::Leaf(l) => l.reset(),
        }
        Ok(())
    }

    /// Route a record down to its leaf, creating partitions on first use.
    pub(crate) fn add(&mut self, id: NodeId, record: &Record) -> Result<(), CacheError> {
        let key = match &self.nodes[id.0].body {
            Body::Partition(p) => Some(p.kind.key_of(record, &self.layout.buckets)),
            Body::Leaf(_) => None,
        };
        match key {
            Some(key) => {
                let existing = match &self.nodes[id.0].body {
                    Body::Partition(p) => matches!(p.children.get(&key), Some(Child::Realized(_))),
                    Body::Leaf(_) => false,
                };
                if let Some(child) = self.realize(id, &key) {
                    if !existing {
                        self.create(child)?;
                    }
                    self.add(child, record)?;
                }
            }
            None => {
                let node = &mut self.nodes[id.0];
                if let Body::Leaf(leaf) = &mut node.body {
                    leaf.append(&self.pool, &node.path, record)?;
                }
            }
        }
        if let Some(info) = self.nodes[id.0].info.as_mut() {
            info.add(record);
        }
        Ok(())
    }

    /// Finish an update bottom-up. Returns whether anything below changed.
    pub(crate) fn finalize(&mut self, id: NodeId) -> Result<bool, CacheError> {
        let changed = if self.is_leaf(id) {
            let node = &mut self.nodes[id.0];
            match &mut node.body {
                Body::Leaf(leaf) => leaf.finish(&self.pool, &node.path)?,
                Body::Partition(_) => false,
            }
        } else {
            let mut changed = false;
            for child in self.realized_children(id) {
                changed |= self.finalize(child)?;
            }
            changed
        };
        if changed || id == ROOT {
            self.write_info(id)?;
        }
        Ok(changed)
    }

    fn write_info(&self, id: NodeId) -> Result<(), CacheError> {
        let node = &self.nodes[id.0];
        let json = match &node.info {
            Some(info) => info.to_json()?,
            None => self.empty_info().to_json()?,
        };
        self.pool.write_atomic(&node.path.join(INFO), json.as_bytes())?;
        Ok(())
    }

    /// Read a delta file unless it predates `main`, in which case it is
    /// discarded.
    fn read_delta(&self, delta: &Path, main: &Path) -> Option<String> {
        if !delta.exists() {
            return None;
        }
        if is_stale(delta, main) {
            debug!(path = %delta.display(), "discarding stale delta");
            if let Err(e) = fs::remove_file(delta) {
                debug!(path = %delta.display(), error = %e, "could not remove stale delta");
            }
            return None;
        }
        match self.pool.read_to_string(delta) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(path = %delta.display(), error = %e, "cannot read delta");
                None
            }
        }
    }

    /// Load the persisted aggregate and deletion aggregate, once.
    fn ensure_info(&mut self, id: NodeId) {
        if self.nodes[id.0].info_loaded {
            return;
        }
        let node = &self.nodes[id.0];
        let info_path = node.path.join(INFO);
        let persisted = match self.pool.read_to_string(&info_path) {
            Ok(text) => match InfoAccumulator::from_json(&text, Rc::clone(&self.layout.buckets)) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!(path = %info_path.display(), error = %e, "ignoring corrupt aggregate");
                    None
                }
            },
            Err(e) => {
                warn!(path = %info_path.display(), error = %e, "no aggregate, falling back to scan");
                None
            }
        };
        let delta_path = node.delta_dir.join(DELETED_INFO);
        let deleted = self.read_delta(&delta_path, &node.main_file()).and_then(|text| {
            InfoAccumulator::from_json(&text, Rc::clone(&self.layout.buckets))
                .map_err(|e| warn!(path = %delta_path.display(), error = %e, "ignoring corrupt delta"))
                .ok()
        });

        let node = &mut self.nodes[id.0];
        node.info_loaded = true;
        if node.info.is_none() {
            node.info = persisted;
        }
        if let Some(mut deleted) = deleted {
            deleted.accumulate_all(&node.deleted_info);
            node.deleted_info = deleted;
        }
    }

    /// Load a leaf's persisted deletion list, once.
    pub(crate) fn ensure_leaf_deltas(&mut self, id: NodeId) {
        let node = &self.nodes[id.0];
        match &node.body {
            Body::Leaf(leaf) if !leaf.deleted_loaded() => {}
            _ => return,
        }
        let text = self.read_delta(&node.delta_dir.join(DELETED_FILELIST), &node.main_file());
        if let Body::Leaf(leaf) = &mut self.nodes[id.0].body {
            leaf.load_deleted(text);
        }
    }

    /// Next record of leaf `id` at or after `*pos`.
    pub(crate) fn leaf_next(
        &mut self,
        id: NodeId,
        pos: &mut usize,
        filter: Option<&Filter>,
        include_deleted: bool,
    ) -> Result<Option<Record>, CacheError> {
        let origin = Origin {
            cache: self.cache_id,
            node: id,
        };
        let node = &mut self.nodes[id.0];
        match &mut node.body {
            Body::Leaf(leaf) => {
                leaf.next_matching(&self.pool, &node.path, origin, pos, filter, include_deleted)
            }
            Body::Partition(_) => Ok(None),
        }
    }

    pub(crate) fn merge_info(
        &mut self,
        id: NodeId,
        acc: &mut InfoAccumulator,
        filter: Option<&Filter>,
    ) -> Result<(), CacheError> {
        if filter.map_or(false, Filter::is_unsatisfiable) {
            return Ok(());
        }
        if filter.is_none() {
            self.ensure_info(id);
            let node = &self.nodes[id.0];
            if let Some(info) = &node.info {
                acc.accumulate_all(info);
                acc.decumulate_all(&node.deleted_info);
                return Ok(());
            }
        }
        if self.is_leaf(id) {
            return self.scan_leaf(id, acc, filter);
        }
        for (child, residual) in self.filtered(id, filter) {
            self.merge_info(child, acc, residual.as_ref())?;
        }
        Ok(())
    }

    /// Aggregate a leaf by reading its records, memoized per filter. Nothing
    /// reaches `acc` unless the whole leaf was read.
    fn scan_leaf(
        &mut self,
        id: NodeId,
        acc: &mut InfoAccumulator,
        filter: Option<&Filter>,
    ) -> Result<(), CacheError> {
        let key = filter.map_or_else(|| "*".to_string(), Filter::to_string);
        if let Body::Leaf(leaf) = &self.nodes[id.0].body {
            if let Some(found) = leaf.memo(&key) {
                acc.accumulate_all(found);
                return Ok(());
            }
        }
        self.ensure_leaf_deltas(id);
        let mut found = self.empty_info();
        let mut pos = 0;
        while let Some(record) = self.leaf_next(id, &mut pos, filter, false)? {
            found.add(&record);
        }
        acc.accumulate_all(&found);
        if let Body::Leaf(leaf) = &mut self.nodes[id.0].body {
            leaf.remember(key, found);
        }
        Ok(())
    }

    /// Record a deletion against the leaf that produced `record` and every
    /// ancestor's deletion aggregate. False if it was already deleted.
    pub(crate) fn delete(&mut self, record: &Record) -> Result<bool, CacheError> {
        let foreign = || CacheError::ForeignRecord(record.path().to_string());
        let origin = match record.origin() {
            Some(o) if o.cache == self.cache_id && o.node.0 < self.nodes.len() => o,
            _ => return Err(foreign()),
        };
        self.ensure_leaf_deltas(origin.node);
        let fresh = match &mut self.nodes[origin.node.0].body {
            Body::Leaf(leaf) => leaf.mark_deleted(record.path()),
            Body::Partition(_) => return Err(foreign()),
        };
        if !fresh {
            return Ok(false);
        }
        let mut cur = Some(origin.node);
        while let Some(id) = cur {
            self.ensure_info(id);
            let node = &mut self.nodes[id.0];
            node.deleted_info.add(record);
            cur = node.parent;
            self.pending.insert(id);
        }
        Ok(true)
    }

    /// Write pending deletions to the delta directories. Returns how many
    /// nodes were saved; nodes we lack permission for are skipped.
    pub(crate) fn save_deletions(&mut self) -> Result<usize, CacheError> {
        let mut pending = std::mem::take(&mut self.pending).into_iter();
        let mut saved = 0;
        while let Some(id) = pending.next() {
            match self.save_node(id) {
                Ok(()) => saved += 1,
                Err(CacheError::IoError(e)) if e.kind() == io::ErrorKind::PermissionDenied => {
                    warn!(
                        path = %self.nodes[id.0].delta_dir.display(),
                        "no permission to save deletions, skipping"
                    );
                }
                Err(e) => {
                    self.pending.insert(id);
                    self.pending.extend(pending);
                    return Err(e);
                }
            }
        }
        Ok(saved)
    }

    fn save_node(&self, id: NodeId) -> Result<(), CacheError> {
        let node = &self.nodes[id.0];
        fs::create_dir_all(&node.delta_dir)?;
        if let Body::Leaf(leaf) = &node.body {
            let mut text = String::new();
            for path in leaf.deleted_paths() {
                text.push_str(path);
                text.push('\n');
            }
            self.pool
                .write_atomic(&node.delta_dir.join(DELETED_FILELIST), text.as_bytes())?;
        }
        let json = node.deleted_info.to_json()?;
        self.pool
            .write_atomic(&node.delta_dir.join(DELETED_INFO), json.as_bytes())?;
        Ok(())
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
