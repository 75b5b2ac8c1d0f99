//! Aggregate statistics
//!
//! [`Info`] is a `(file count, total size)` pair. [`InfoAccumulator`] holds a
//! total plus per-user, per-dataset and per-size-bucket aggregates, and is
//! what each cache node persists as its `info` file.
//!
//! Accumulating and then decumulating the same aggregate under the same
//! [`Selector`] restores the previous state exactly: map entries are created
//! on demand and dropped again once their file count returns to zero. Deleted
//! records are netted out this way without rescanning. Counts are unsigned,
//! so taking away more than is there clamps at zero and is reported rather
//! than passed over.

use crate::buckets::Buckets;
use crate::error::CacheError;
use crate::format::size_to_string;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::warn;

/// Entries at or below this size are left out of listings.
pub const TRIVIAL_SIZE: u64 = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub n_files: u64,
    pub total_size: u64,
}

impl Info {
    pub fn new(n_files: u64, total_size: u64) -> Self {
        Info {
            n_files,
            total_size,
        }
    }

    pub fn of(record: &Record) -> Self {
        Info::new(1, record.size())
    }

    pub fn add(&mut self, other: Info) {
        self.n_files += other.n_files;
        self.total_size += other.total_size;
    }

    /// Subtract `other`. Returns false when `other` exceeds what is here;
    /// the fields are then clamped at zero.
    pub fn remove(&mut self, other: Info) -> bool {
        match (
            self.n_files.checked_sub(other.n_files),
            self.total_size.checked_sub(other.total_size),
        ) {
            (Some(n_files), Some(total_size)) => {
                *self = Info::new(n_files, total_size);
                true
            }
            _ => {
                self.n_files = self.n_files.saturating_sub(other.n_files);
                self.total_size = self.total_size.saturating_sub(other.total_size);
                false
            }
        }
    }

    pub fn is_zero(&self) -> bool {
        self.n_files == 0 && self.total_size == 0
    }
}

impl fmt::Display for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {} files",
            size_to_string(self.total_size),
            self.n_files
        )
    }
}

/// Which partition values are fixed for an aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Selector {
    pub owner: Option<String>,
    pub dataset: Option<String>,
    pub size_bucket: Option<usize>,
}

impl Selector {
    pub fn with_owner(&self, owner: impl Into<String>) -> Self {
        Selector {
            owner: Some(owner.into()),
            ..self.clone()
        }
    }

    pub fn with_dataset(&self, dataset: impl Into<String>) -> Self {
        Selector {
            dataset: Some(dataset.into()),
            ..self.clone()
        }
    }

    pub fn with_size_bucket(&self, bucket: usize) -> Self {
        Selector {
            size_bucket: Some(bucket),
            ..self.clone()
        }
    }

    /// Selector fixing every dimension to the record's own values.
    pub fn of(record: &Record, buckets: &Buckets) -> Self {
        Selector {
            owner: Some(record.user().to_string()),
            dataset: Some(record.dataset().to_string()),
            size_bucket: Some(buckets.index_containing(record.size())),
        }
    }
}

/// On-disk layout of an accumulator.
#[derive(Debug, Default, Serialize, Deserialize)]
struct InfoFile {
    #[serde(default)]
    total: Info,
    #[serde(default)]
    users: BTreeMap<String, Info>,
    #[serde(default)]
    datasets: BTreeMap<String, Info>,
    #[serde(default)]
    sizes: Vec<Option<Info>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoAccumulator {
    buckets: Rc<Buckets>,
    total: Info,
    users: BTreeMap<String, Info>,
    datasets: BTreeMap<String, Info>,
    sizes: Vec<Option<Info>>,
}

fn add_keyed(map: &mut BTreeMap<String, Info>, key: &str, info: Info) {
    map.entry(key.to_string()).or_default().add(info);
}

/// False when `key` holds less than `info`, including not being there at all.
fn remove_keyed(map: &mut BTreeMap<String, Info>, key: &str, info: Info) -> bool {
    match map.get_mut(key) {
        Some(entry) => {
            let exact = entry.remove(info);
            if entry.n_files == 0 {
                map.remove(key);
            }
            exact
        }
        None => info.is_zero(),
    }
}

impl InfoAccumulator {
    pub fn new(buckets: Rc<Buckets>) -> Self {
        let sizes = vec![None; buckets.len()];
        InfoAccumulator {
            buckets,
            total: Info::default(),
            users: BTreeMap::new(),
            datasets: BTreeMap::new(),
            sizes,
        }
    }

    pub fn total(&self) -> Info {
        self.total
    }

    pub fn users(&self) -> &BTreeMap<String, Info> {
        &self.users
    }

    pub fn datasets(&self) -> &BTreeMap<String, Info> {
        &self.datasets
    }

    /// Per-bucket aggregates, indexed like the size buckets.
    pub fn sizes(&self) -> &[Option<Info>] {
        &self.sizes
    }

    pub fn buckets(&self) -> &Buckets {
        &self.buckets
    }

    pub fn is_empty(&self) -> bool {
        self.total.n_files == 0
    }

    pub fn add(&mut self, record: &Record) {
        let sel = Selector::of(record, &self.buckets);
        self.accumulate(Info::of(record), &sel);
    }

    pub fn remove(&mut self, record: &Record) -> bool {
        let sel = Selector::of(record, &self.buckets);
        self.decumulate(Info::of(record), &sel)
    }

    /// Add `info` to the total and to each dimension `sel` fixes.
    pub fn accumulate(&mut self, info: Info, sel: &Selector) {
        self.total.add(info);
        if let Some(owner) = &sel.owner {
            add_keyed(&mut self.users, owner, info);
        }
        if let Some(dataset) = &sel.dataset {
            add_keyed(&mut self.datasets, dataset, info);
        }
        if let Some(i) = sel.size_bucket {
            self.accumulate_size(i, info);
        }
    }

    /// Inverse of [`accumulate`](Self::accumulate). Removing more than was
    /// accumulated clamps at zero, is logged, and returns false.
    pub fn decumulate(&mut self, info: Info, sel: &Selector) -> bool {
        let mut exact = self.total.remove(info);
        if let Some(owner) = &sel.owner {
            exact &= remove_keyed(&mut self.users, owner, info);
        }
        if let Some(dataset) = &sel.dataset {
            exact &= remove_keyed(&mut self.datasets, dataset, info);
        }
        if let Some(i) = sel.size_bucket {
            exact &= self.decumulate_size(i, info);
        }
        if !exact {
            warn!(removed = %info, selector = ?sel, "aggregate decumulated below zero");
        }
        exact
    }

    /// Merge another accumulator in, map by map.
    pub fn accumulate_all(&mut self, other: &InfoAccumulator) {
        self.total.add(other.total);
        for (user, info) in &other.users {
            add_keyed(&mut self.users, user, *info);
        }
        for (dataset, info) in &other.datasets {
            add_keyed(&mut self.datasets, dataset, *info);
        }
        for (i, info) in other.sizes.iter().enumerate() {
            if let Some(info) = info {
                self.accumulate_size(i, *info);
            }
        }
    }

    /// Inverse of [`accumulate_all`](Self::accumulate_all).
    /// Inverse of [`accumulate_all`](Self::accumulate_all), with the same
    /// clamping and reporting as [`decumulate`](Self::decumulate).
    pub fn decumulate_all(&mut self, other: &InfoAccumulator) -> bool {
        let mut exact = self.total.remove(other.total);
        for (user, info) in &other.users {
            exact &= remove_keyed(&mut self.users, user, *info);
        }
        for (dataset, info) in &other.datasets {
            exact &= remove_keyed(&mut self.datasets, dataset, *info);
        }
        for (i, info) in other.sizes.iter().enumerate() {
            if let Some(info) = info {
                exact &= self.decumulate_size(i, *info);
            }
        }
        if !exact {
            warn!(removed = %other.total, "aggregate decumulated below zero");
        }
        exact
    }

    fn accumulate_size(&mut self, i: usize, info: Info) {
        if i >= self.sizes.len() {
            self.sizes.resize(i + 1, None);
        }
        self.sizes[i].get_or_insert_with(Info::default).add(info);
    }

    fn decumulate_size(&mut self, i: usize, info: Info) -> bool {
        let slot = match self.sizes.get_mut(i) {
            Some(slot) => slot,
            None => return info.is_zero(),
        };
        match slot {
            Some(entry) => {
                let exact = entry.remove(info);
                if entry.n_files == 0 {
                    *slot = None;
                }
                exact
            }
            None => info.is_zero(),
        }
    }

    pub fn to_json(&self) -> Result<String, CacheError> {
        let file = InfoFile {
            total: self.total,
            users: self.users.clone(),
            datasets: self.datasets.clone(),
            sizes: self.sizes.clone(),
        };
        Ok(serde_json::to_string(&file)?)
    }

    pub fn from_json(text: &str, buckets: Rc<Buckets>) -> Result<Self, CacheError> {
        let file: InfoFile = serde_json::from_str(text)?;
        let mut sizes = file.sizes;
        if sizes.len() < buckets.len() {
            sizes.resize(buckets.len(), None);
        }
        Ok(InfoAccumulator {
            buckets,
            total: file.total,
            users: file.users,
            datasets: file.datasets,
            sizes,
        })
    }

    pub fn fmt_total(&self) -> String {
        format!("total {}", self.total)
    }

    pub fn fmt_users(&self) -> String {
        Self::fmt_keyed(self.fmt_total(), self.users.iter().map(|(k, v)| (k.clone(), *v)))
    }

    pub fn fmt_datasets(&self) -> String {
        Self::fmt_keyed(
            self.fmt_total(),
            self.datasets.iter().map(|(k, v)| (k.clone(), *v)),
        )
    }

    /// Size histogram in bucket order, labelled by each bucket's lower bound.
    pub fn fmt_sizes(&self) -> String {
        let mut lines = vec![self.fmt_total()];
        for (i, info) in self.sizes.iter().enumerate() {
            if let Some(info) = info {
                let label = if i < self.buckets.len() {
                    format!(">= {}", size_to_string(self.buckets.bound(i)))
                } else {
                    format!("bucket {}", i)
                };
                lines.push(format!("{} {}", label, info));
            }
        }
        lines.join("\n")
    }

    fn fmt_keyed(header: String, entries: impl Iterator<Item = (String, Info)>) -> String {
        let mut entries: Vec<(String, Info)> = entries.collect();
        entries.sort_by(|a, b| b.1.total_size.cmp(&a.1.total_size).then(a.0.cmp(&b.0)));
        let mut lines = vec![header];
        for (name, info) in entries {
            if info.total_size > TRIVIAL_SIZE {
                lines.push(format!("{} {}", name, info));
            }
        }
        lines.join("\n")
    }
}
