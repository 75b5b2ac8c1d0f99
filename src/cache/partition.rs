//! Partition kinds
//!
//! Each level of the cache tree partitions records along one dimension. A
//! [`PartitionKind`] knows how to extract its key from a record, how to name
//! the child directory for a key, and how to prune or specialize a filter for
//! one child: children that cannot match are skipped, and a dimension the
//! child's key already guarantees is cleared before recursing.

use crate::buckets::Buckets;
use crate::error::CacheError;
use crate::filter::Filter;
use crate::format::{parse_size, week_of};
use crate::info::Selector;
use crate::record::Record;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use tracing::warn;

/// Prefix of every partition directory. Purging only ever removes entries
/// carrying it.
pub const PARTITION_PREFIX: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
    /// ISO week of the modification time.
    Weekly,
    /// Size bucket index.
    Size,
    Dataset,
    Owner,
}

/// Partition order used when a cache does not configure one.
pub const DEFAULT_PARTITIONS: [PartitionKind; 4] = [
    PartitionKind::Weekly,
    PartitionKind::Owner,
    PartitionKind::Size,
    PartitionKind::Dataset,
];

impl FromStr for PartitionKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(PartitionKind::Weekly),
            "size" => Ok(PartitionKind::Size),
            "dataset" => Ok(PartitionKind::Dataset),
            "user" => Ok(PartitionKind::Owner),
            other => Err(CacheError::InvalidPartitionKind(other.to_string())),
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PartitionKind::Weekly => "weekly",
            PartitionKind::Size => "size",
            PartitionKind::Dataset => "dataset",
            PartitionKind::Owner => "user",
        };
        f.write_str(name)
    }
}

/// Key of one child partition. Ordering gives deterministic iteration:
/// weeks chronologically, buckets by index, names lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PartitionKey {
    Week(u32),
    SizeBucket(usize),
    Name(String),
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Week(w) => write!(f, "{}", w),
            PartitionKey::SizeBucket(i) => write!(f, "#{}", i),
            PartitionKey::Name(n) => f.write_str(n),
        }
    }
}

/// Partition chain plus the size buckets it (and every aggregate) uses.
#[derive(Debug, Clone)]
pub struct Layout {
    pub kinds: Vec<PartitionKind>,
    pub buckets: Rc<Buckets>,
}

impl Default for Layout {
    fn default() -> Self {
        Layout {
            kinds: DEFAULT_PARTITIONS.to_vec(),
            buckets: Rc::new(Buckets::default()),
        }
    }
}

impl Layout {
    pub fn new(kinds: Vec<PartitionKind>, buckets: Buckets) -> Self {
        Layout {
            kinds,
            buckets: Rc::new(buckets),
        }
    }

    /// Build from configured names; an empty kind list means the default chain.
    pub fn from_names(kinds: &[String], size_buckets: &[String]) -> Result<Self, CacheError> {
        let kinds = if kinds.is_empty() {
            DEFAULT_PARTITIONS.to_vec()
        } else {
            let mut parsed: Vec<PartitionKind> = Vec::with_capacity(kinds.len());
            for name in kinds {
                let kind: PartitionKind = name.parse()?;
                if parsed.contains(&kind) {
                    return Err(CacheError::ConfigError(format!(
                        "partition kind '{}' listed twice",
                        kind
                    )));
                }
                parsed.push(kind);
            }
            parsed
        };
        let bounds = size_buckets
            .iter()
            .map(|s| parse_size(s))
            .collect::<Result<Vec<u64>, CacheError>>()?;
        Ok(Layout::new(kinds, Buckets::new(bounds)))
    }
}

// Names become directory names, so '/' (and the escape char itself) are
// percent-encoded.
fn escape_name(name: &str) -> String {
    name.replace('%', "%25").replace('/', "%2F")
}

fn unescape_name(name: &str) -> String {
    name.replace("%2F", "/").replace("%25", "%")
}

impl PartitionKind {
    pub fn key_of(&self, record: &Record, buckets: &Buckets) -> PartitionKey {
        match self {
            PartitionKind::Weekly => PartitionKey::Week(week_of(record.mtime())),
            PartitionKind::Size => PartitionKey::SizeBucket(buckets.index_containing(record.size())),
            PartitionKind::Dataset => PartitionKey::Name(record.dataset().to_string()),
            PartitionKind::Owner => PartitionKey::Name(record.user().to_string()),
        }
    }

    /// Directory name for a child. Size buckets are named by their lower
    /// bound so a listing can be mapped back to an index.
    pub fn dir_name(&self, key: &PartitionKey, buckets: &Buckets) -> String {
        let body = match key {
            PartitionKey::Week(w) => w.to_string(),
            PartitionKey::SizeBucket(i) => buckets.bound(*i).to_string(),
            PartitionKey::Name(n) => escape_name(n),
        };
        format!("{}{}", PARTITION_PREFIX, body)
    }

    /// Inverse of [`dir_name`](Self::dir_name). Entries without the partition
    /// prefix are not children and yield `None`, as do unparsable ones.
    pub fn parse_dir_name(&self, name: &str, buckets: &Buckets) -> Option<PartitionKey> {
        let body = name.strip_prefix(PARTITION_PREFIX)?;
        match self {
            PartitionKind::Weekly => match body.parse() {
                Ok(w) => Some(PartitionKey::Week(w)),
                Err(_) => {
                    warn!(entry = name, "ignoring unparsable week partition");
                    None
                }
            },
            PartitionKind::Size => {
                let index = body.parse::<u64>().ok().and_then(|b| buckets.index_of(b).ok());
                if index.is_none() {
                    warn!(
                        entry = name,
                        "ignoring size partition not matching configured buckets"
                    );
                }
                index.map(PartitionKey::SizeBucket)
            }
            PartitionKind::Dataset | PartitionKind::Owner => {
                Some(PartitionKey::Name(unescape_name(body)))
            }
        }
    }

    /// Narrow the parent's selector to this child.
    pub fn narrow(&self, sel: &Selector, key: &PartitionKey) -> Selector {
        match (self, key) {
            (PartitionKind::Size, PartitionKey::SizeBucket(i)) => sel.with_size_bucket(*i),
            (PartitionKind::Dataset, PartitionKey::Name(n)) => sel.with_dataset(n.clone()),
            (PartitionKind::Owner, PartitionKey::Name(n)) => sel.with_owner(n.clone()),
            _ => sel.clone(),
        }
    }

    /// Decide whether a child can hold matching records.
    ///
    /// `None` prunes the child. `Some(residual)` descends with the filter
    /// minus whatever this child's key already guarantees.
    pub fn admit(
        &self,
        key: &PartitionKey,
        filter: Option<&Filter>,
        buckets: &Buckets,
    ) -> Option<Option<Filter>> {
        let filter = match filter {
            None => return Some(None),
            Some(f) => f,
        };
        match (self, key) {
            (PartitionKind::Weekly, PartitionKey::Week(w)) => {
                let mut residual = Some(filter.clone());
                if let Some(before) = filter.mtime.before {
                    let wb = week_of(before);
                    if *w > wb {
                        return None;
                    }
                    if *w < wb {
                        residual = residual.and_then(|f| f.clear_mtime_before());
                    }
                }
                if let Some(after) = filter.mtime.after {
                    let wa = week_of(after);
                    if *w < wa {
                        return None;
                    }
                    if *w > wa {
                        residual = residual.and_then(|f| f.clear_mtime_after());
                    }
                }
                Some(residual)
            }
            (PartitionKind::Size, PartitionKey::SizeBucket(i)) => match filter.size_geq {
                None => Some(Some(filter.clone())),
                Some(size) => {
                    let (min, max) = buckets.minmax(*i);
                    if max.map_or(false, |max| max < size) {
                        None
                    } else if min >= size {
                        Some(filter.clear_size())
                    } else {
                        Some(Some(filter.clone()))
                    }
                }
            },
            (PartitionKind::Dataset, PartitionKey::Name(name)) => match &filter.dataset {
                None => Some(Some(filter.clone())),
                Some(pin) if pin.matches(name) => Some(filter.clear_dataset()),
                Some(_) => None,
            },
            (PartitionKind::Owner, PartitionKey::Name(name)) => match &filter.owner {
                None => Some(Some(filter.clone())),
                Some(pin) if pin.matches(name) => Some(filter.clear_owner()),
                Some(_) => None,
            },
            _ => Some(Some(filter.clone())),
        }
    }
}
