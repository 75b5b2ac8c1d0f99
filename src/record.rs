//! File metadata records
//!
//! A `Record` is one file or directory's captured metadata. Records are
//! immutable; the only thing a cache attaches to a record it hands out is an
//! [`Origin`], used to route a later delete notification back to the leaf
//! that produced it.

use crate::cache::NodeId;
use crate::error::CacheError;
use crate::format::{
    date_to_string, escape_field, parse_time, size_to_string, time_to_string, unescape_field,
};
use crate::merge::SortKey;
use std::fmt;

/// Dataset tag for paths no dataset rule claims.
pub const NO_DATASET: &str = "-";

/// Minimum width of the path column in listings.
const MIN_LISTING_WIDTH: usize = 50;

/// Which cache node a record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Origin {
    pub(crate) cache: u64,
    pub(crate) node: NodeId,
}

#[derive(Debug, Clone)]
pub struct Record {
    path: String,
    dataset: String,
    user: String,
    group: String,
    size: u64,
    mtime: i64,
    perms: String,
    origin: Option<Origin>,
}

impl Record {
    pub fn new(
        path: impl Into<String>,
        dataset: impl Into<String>,
        user: impl Into<String>,
        group: impl Into<String>,
        size: u64,
        mtime: i64,
        perms: impl Into<String>,
    ) -> Self {
        Record {
            path: path.into(),
            dataset: dataset.into(),
            user: user.into(),
            group: group.into(),
            size,
            mtime,
            perms: perms.into(),
            origin: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn perms(&self) -> &str {
        &self.perms
    }

    pub fn is_dir(&self) -> bool {
        self.perms.starts_with('d')
    }

    pub fn origin(&self) -> Option<Origin> {
        self.origin
    }

    pub(crate) fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Serialize as one leaf-file line (newline included).
    ///
    /// Field order: user group size mtime perms dataset path. The path goes
    /// last and unescaped so it may contain spaces; it may not contain
    /// newlines. The other text fields are escaped so they hold no whitespace.
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {} {} {}\n",
            escape_field(&self.user),
            escape_field(&self.group),
            self.size,
            time_to_string(self.mtime),
            self.perms,
            escape_field(&self.dataset),
            self.path
        )
    }

    /// Parse one leaf-file line. Runs of whitespace between the fixed fields
    /// are tolerated; the path is everything after the single space that
    /// follows the dataset, leading blanks included.
    pub fn parse_line(line: &str) -> Result<Self, CacheError> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let mut rest = line;
        let mut fields: [&str; 6] = [""; 6];
        for field in fields.iter_mut() {
            rest = rest.trim_start();
            let end = rest
                .find(char::is_whitespace)
                .ok_or_else(|| CacheError::InvalidRecord(format!("too few fields: {}", line)))?;
            *field = &rest[..end];
            rest = &rest[end..];
        }
        let mut separator = rest.chars();
        separator.next();
        let path = separator.as_str();
        if path.is_empty() {
            return Err(CacheError::InvalidRecord(format!("missing path: {}", line)));
        }
        let size = fields[2]
            .parse()
            .map_err(|_| CacheError::InvalidRecord(format!("bad size '{}'", fields[2])))?;
        let mtime = parse_time(fields[3])?;
        Ok(Record::new(
            path,
            unescape_field(fields[5])?,
            unescape_field(fields[0])?,
            unescape_field(fields[1])?,
            size,
            mtime,
            fields[4],
        ))
    }

    /// Listing line, widening the path column in steps of ten when a path
    /// overflows it. Returns the line and the width to use for the next one.
    pub fn format(&self, width: usize) -> (String, usize) {
        let mut width = width.max(MIN_LISTING_WIDTH);
        if self.path.len() > width {
            width = (self.path.len() / 10 + 1) * 10;
        }
        let line = format!(
            "{} {} {:>4} {:<width$} {}:{}",
            self.perms,
            date_to_string(self.mtime),
            size_to_string(self.size),
            self.path,
            self.user,
            self.group,
            width = width
        );
        (line, width)
    }
}

// Equality is over the metadata only; where a record was read from is not
// part of its identity.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.dataset == other.dataset
            && self.user == other.user
            && self.group == other.group
            && self.size == other.size
            && self.mtime == other.mtime
            && self.perms == other.perms
    }
}

impl Eq for Record {}

impl SortKey for Record {
    fn sort_key(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(0).0)
    }
}
