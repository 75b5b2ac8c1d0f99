//! Conjunctive record filters
//!
//! A [`Filter`] is a conjunction of independent dimensions. Intersection only
//! ever narrows; an owner or dataset that disagrees between two operands
//! collapses to [`Pin::Unsatisfiable`] instead of failing, so `selects` and
//! partition pruning reject everything downstream cheaply.
//!
//! Partition nodes push filters down by clearing a dimension their key
//! already guarantees. Clearing returns `None` once nothing is left to test.

use crate::error::CacheError;
use crate::format::time_to_string;
use crate::record::Record;
use glob::Pattern;
use regex::Regex;
use std::fmt;

/// An exact-match constraint on a string field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pin {
    Value(String),
    Unsatisfiable,
}

impl Pin {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Pin::Value(v) => v == value,
            Pin::Unsatisfiable => false,
        }
    }

    fn intersect(a: &Option<Pin>, b: &Option<Pin>) -> Option<Pin> {
        match (a, b) {
            (None, other) | (other, None) => other.clone(),
            (Some(Pin::Value(x)), Some(Pin::Value(y))) if x == y => Some(Pin::Value(x.clone())),
            _ => Some(Pin::Unsatisfiable),
        }
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pin::Value(v) => write!(f, "{}", v),
            Pin::Unsatisfiable => write!(f, "!"),
        }
    }
}

/// Modification-time window: `after <= mtime < before`, each bound optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MtimeWindow {
    pub before: Option<i64>,
    pub after: Option<i64>,
}

impl MtimeWindow {
    pub fn is_unbounded(&self) -> bool {
        self.before.is_none() && self.after.is_none()
    }

    pub fn contains(&self, mtime: i64) -> bool {
        self.before.map_or(true, |b| mtime < b) && self.after.map_or(true, |a| mtime >= a)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub owner: Option<Pin>,
    pub dataset: Option<Pin>,
    pub size_geq: Option<u64>,
    pub mtime: MtimeWindow,
    pub not_paths: Vec<Pattern>,
    pub regex: Vec<Regex>,
}

fn tighter<T: Copy>(a: Option<T>, b: Option<T>, pick: fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(pick(x, y)),
        (x, None) => x,
        (None, y) => y,
    }
}

impl Filter {
    pub fn owner(owner: impl Into<String>) -> Self {
        Filter {
            owner: Some(Pin::Value(owner.into())),
            ..Default::default()
        }
    }

    pub fn dataset(dataset: impl Into<String>) -> Self {
        Filter {
            dataset: Some(Pin::Value(dataset.into())),
            ..Default::default()
        }
    }

    pub fn size_geq(size: u64) -> Self {
        Filter {
            size_geq: Some(size),
            ..Default::default()
        }
    }

    pub fn modified_before(t: i64) -> Self {
        Filter {
            mtime: MtimeWindow {
                before: Some(t),
                after: None,
            },
            ..Default::default()
        }
    }

    pub fn modified_since(t: i64) -> Self {
        Filter {
            mtime: MtimeWindow {
                before: None,
                after: Some(t),
            },
            ..Default::default()
        }
    }

    pub fn excluding(glob: &str) -> Result<Self, CacheError> {
        let pattern = Pattern::new(glob)
            .map_err(|e| CacheError::InvalidFilter(format!("bad glob '{}': {}", glob, e)))?;
        Ok(Filter {
            not_paths: vec![pattern],
            ..Default::default()
        })
    }

    pub fn matching(re: &str) -> Result<Self, CacheError> {
        let regex = Regex::new(re)
            .map_err(|e| CacheError::InvalidFilter(format!("bad regex '{}': {}", re, e)))?;
        Ok(Filter {
            regex: vec![regex],
            ..Default::default()
        })
    }

    /// True when no dimension is constrained.
    pub fn is_empty(&self) -> bool {
        self.owner.is_none()
            && self.dataset.is_none()
            && self.size_geq.is_none()
            && self.mtime.is_unbounded()
            && self.not_paths.is_empty()
            && self.regex.is_empty()
    }

    /// True when an owner or dataset conflict makes the filter match nothing.
    pub fn is_unsatisfiable(&self) -> bool {
        matches!(self.owner, Some(Pin::Unsatisfiable))
            || matches!(self.dataset, Some(Pin::Unsatisfiable))
    }

    pub fn intersect(&self, other: &Filter) -> Filter {
        let mut not_paths = self.not_paths.clone();
        for p in &other.not_paths {
            if !not_paths.iter().any(|q| q.as_str() == p.as_str()) {
                not_paths.push(p.clone());
            }
        }
        let mut regex = self.regex.clone();
        for r in &other.regex {
            if !regex.iter().any(|q| q.as_str() == r.as_str()) {
                regex.push(r.clone());
            }
        }
        Filter {
            owner: Pin::intersect(&self.owner, &other.owner),
            dataset: Pin::intersect(&self.dataset, &other.dataset),
            size_geq: tighter(self.size_geq, other.size_geq, u64::max),
            mtime: MtimeWindow {
                before: tighter(self.mtime.before, other.mtime.before, i64::min),
                after: tighter(self.mtime.after, other.mtime.after, i64::max),
            },
            not_paths,
            regex,
        }
    }

    /// Intersect two optional filters, `None` meaning "everything".
    pub fn intersect_opt(a: Option<&Filter>, b: Option<&Filter>) -> Option<Filter> {
        match (a, b) {
            (Some(x), Some(y)) => Some(x.intersect(y)),
            (Some(x), None) | (None, Some(x)) => Some(x.clone()),
            (None, None) => None,
        }
    }

    pub fn selects(&self, record: &Record) -> bool {
        if self.is_unsatisfiable() {
            return false;
        }
        if let Some(owner) = &self.owner {
            if !owner.matches(record.user()) {
                return false;
            }
        }
        if let Some(dataset) = &self.dataset {
            if !dataset.matches(record.dataset()) {
                return false;
            }
        }
        if let Some(size) = self.size_geq {
            if record.size() < size {
                return false;
            }
        }
        if !self.mtime.contains(record.mtime()) {
            return false;
        }
        if self.not_paths.iter().any(|p| p.matches(record.path())) {
            return false;
        }
        self.regex.iter().all(|r| r.is_match(record.path()))
    }

    fn normalized(self) -> Option<Filter> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    pub fn clear_owner(&self) -> Option<Filter> {
        Filter {
            owner: None,
            ..self.clone()
        }
        .normalized()
    }

    pub fn clear_dataset(&self) -> Option<Filter> {
        Filter {
            dataset: None,
            ..self.clone()
        }
        .normalized()
    }

    pub fn clear_size(&self) -> Option<Filter> {
        Filter {
            size_geq: None,
            ..self.clone()
        }
        .normalized()
    }

    pub fn clear_mtime_before(&self) -> Option<Filter> {
        let mut f = self.clone();
        f.mtime.before = None;
        f.normalized()
    }

    pub fn clear_mtime_after(&self) -> Option<Filter> {
        let mut f = self.clone();
        f.mtime.after = None;
        f.normalized()
    }
}

/// Canonical rendering, also used as the memo key for leaf scans.
impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let star = |o: Option<String>| o.unwrap_or_else(|| "*".to_string());
        write!(
            f,
            "owner:{},dataset:{},size:{},before:{},after:{}",
            star(self.owner.as_ref().map(|p| p.to_string())),
            star(self.dataset.as_ref().map(|p| p.to_string())),
            star(self.size_geq.map(|s| s.to_string())),
            star(self.mtime.before.map(time_to_string)),
            star(self.mtime.after.map(time_to_string)),
        )?;
        for p in &self.not_paths {
            write!(f, ",not:{}", p.as_str())?;
        }
        for r in &self.regex {
            write!(f, ",regex:{}", r.as_str())?;
        }
        Ok(())
    }
}
