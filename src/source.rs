//! Record sources
//!
//! A cache is rebuilt from exactly one pass over a [`RecordSource`]. Sources
//! must yield records in ascending path order.

mod walker;

pub use walker::{filemode, WalkSource, WalkerConfig};

use crate::error::CacheError;
use crate::record::Record;
use std::path::Path;

pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Record, CacheError>> + 'a>;

pub trait RecordSource {
    /// Short human description, shown by `Cache::describe`.
    fn describe(&self) -> String;

    /// Directory record paths are relative to, when there is one.
    fn root(&self) -> Option<&Path> {
        None
    }

    fn records(&self) -> Result<RecordIter<'_>, CacheError>;
}

/// Fixed in-memory record set, sorted by path on construction.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    records: Vec<Record>,
}

impl VecSource {
    pub fn new(mut records: Vec<Record>) -> Self {
        records.sort_by(|a, b| a.path().cmp(b.path()));
        VecSource { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordSource for VecSource {
    fn describe(&self) -> String {
        format!("{} in-memory records", self.records.len())
    }

    fn records(&self) -> Result<RecordIter<'_>, CacheError> {
        Ok(Box::new(self.records.iter().cloned().map(Ok)))
    }
}
