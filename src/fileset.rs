//! Filesets: anything that can be queried like a cache.
//!
//! [`Cache`] is the primary implementation. [`Union`] merges several
//! filesets into one path-ordered view and [`Filtered`] narrows one by a
//! fixed filter.

use crate::buckets::Buckets;
use crate::cache::{Cache, RecordStream};
use crate::error::CacheError;
use crate::filter::Filter;
use crate::info::InfoAccumulator;
use crate::merge::KMerge;
use crate::record::Record;
use std::path::PathBuf;
use std::rc::Rc;

pub trait Fileset {
    fn describe(&self) -> String;

    /// Size buckets aggregates of this fileset are indexed by.
    fn buckets(&self) -> Rc<Buckets>;

    fn select(&self, filter: Option<&Filter>) -> Result<RecordStream, CacheError>;

    fn merge_info(
        &self,
        acc: &mut InfoAccumulator,
        filter: Option<&Filter>,
    ) -> Result<(), CacheError>;

    fn info(&self, filter: Option<&Filter>) -> Result<InfoAccumulator, CacheError> {
        let mut acc = InfoAccumulator::new(self.buckets());
        self.merge_info(&mut acc, filter)?;
        Ok(acc)
    }

    /// Whether `record` was produced by this fileset.
    fn owns(&self, record: &Record) -> bool;

    /// Directory the record's path is relative to.
    fn source_root(&self, record: &Record) -> Option<PathBuf>;

    fn delete(&self, record: &Record) -> Result<bool, CacheError>;

    fn save_deletions(&self) -> Result<usize, CacheError>;
}

impl Fileset for Cache {
    fn describe(&self) -> String {
        format!("{}: {}", self.name(), Cache::describe(self))
    }

    fn buckets(&self) -> Rc<Buckets> {
        Cache::buckets(self)
    }

    fn select(&self, filter: Option<&Filter>) -> Result<RecordStream, CacheError> {
        Cache::select(self, filter)
    }

    fn merge_info(
        &self,
        acc: &mut InfoAccumulator,
        filter: Option<&Filter>,
    ) -> Result<(), CacheError> {
        Cache::merge_info(self, acc, filter)
    }

    fn owns(&self, record: &Record) -> bool {
        Cache::owns(self, record)
    }

    fn source_root(&self, record: &Record) -> Option<PathBuf> {
        if !self.owns(record) {
            return None;
        }
        self.source().root().map(|p| p.to_path_buf())
    }

    fn delete(&self, record: &Record) -> Result<bool, CacheError> {
        Cache::delete(self, record)
    }

    fn save_deletions(&self) -> Result<usize, CacheError> {
        Cache::save_deletions(self)
    }
}

/// Several filesets seen as one. Streams are merged by path; aggregates are
/// summed, with size buckets taken positionally from the first member.
#[derive(Default)]
pub struct Union {
    members: Vec<Box<dyn Fileset>>,
}

impl Union {
    pub fn new(members: Vec<Box<dyn Fileset>>) -> Self {
        Union { members }
    }

    pub fn push(&mut self, member: Box<dyn Fileset>) {
        self.members.push(member);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn owner_of(&self, record: &Record) -> Option<&dyn Fileset> {
        self.members
            .iter()
            .find(|m| m.owns(record))
            .map(|m| m.as_ref())
    }
}

impl Fileset for Union {
    fn describe(&self) -> String {
        self.members
            .iter()
            .map(|m| m.describe())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn buckets(&self) -> Rc<Buckets> {
        self.members
            .first()
            .map(|m| m.buckets())
            .unwrap_or_default()
    }

    fn select(&self, filter: Option<&Filter>) -> Result<RecordStream, CacheError> {
        let streams = self
            .members
            .iter()
            .map(|m| m.select(filter))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(KMerge::new(streams)))
    }

    fn merge_info(
        &self,
        acc: &mut InfoAccumulator,
        filter: Option<&Filter>,
    ) -> Result<(), CacheError> {
        for member in &self.members {
            member.merge_info(acc, filter)?;
        }
        Ok(())
    }

    fn owns(&self, record: &Record) -> bool {
        self.owner_of(record).is_some()
    }

    fn source_root(&self, record: &Record) -> Option<PathBuf> {
        self.owner_of(record).and_then(|m| m.source_root(record))
    }

    fn delete(&self, record: &Record) -> Result<bool, CacheError> {
        match self.owner_of(record) {
            Some(member) => member.delete(record),
            None => Err(CacheError::ForeignRecord(record.path().to_string())),
        }
    }

    fn save_deletions(&self) -> Result<usize, CacheError> {
        let mut saved = 0;
        for member in &self.members {
            saved += member.save_deletions()?;
        }
        Ok(saved)
    }
}

/// A fileset restricted by a fixed filter, intersected with every request.
pub struct Filtered {
    inner: Box<dyn Fileset>,
    filter: Filter,
}

impl Filtered {
    pub fn new(inner: Box<dyn Fileset>, filter: Filter) -> Self {
        Filtered { inner, filter }
    }

    fn narrow(&self, filter: Option<&Filter>) -> Option<Filter> {
        Filter::intersect_opt(Some(&self.filter), filter).filter(|f| !f.is_empty())
    }
}

impl Fileset for Filtered {
    fn describe(&self) -> String {
        format!("{} [{}]", self.inner.describe(), self.filter)
    }

    fn buckets(&self) -> Rc<Buckets> {
        self.inner.buckets()
    }

    fn select(&self, filter: Option<&Filter>) -> Result<RecordStream, CacheError> {
        self.inner.select(self.narrow(filter).as_ref())
    }

    fn merge_info(
        &self,
        acc: &mut InfoAccumulator,
        filter: Option<&Filter>,
    ) -> Result<(), CacheError> {
        self.inner.merge_info(acc, self.narrow(filter).as_ref())
    }

    fn owns(&self, record: &Record) -> bool {
        self.inner.owns(record)
    }

    fn source_root(&self, record: &Record) -> Option<PathBuf> {
        self.inner.source_root(record)
    }

    fn delete(&self, record: &Record) -> Result<bool, CacheError> {
        self.inner.delete(record)
    }

    fn save_deletions(&self) -> Result<usize, CacheError> {
        self.inner.save_deletions()
    }
}
