//! Leaf partitions
//!
//! A leaf owns the flat `filelist` of its records, one per line, sorted by
//! path once the update that wrote it finishes. Reads go through a pooled
//! handle and are buffered in memory as they are parsed, so a stream cut
//! short by a read failure can be replayed and then resumed from the byte
//! offset the handle remembers.

use super::FILELIST;
use crate::error::CacheError;
use crate::filter::Filter;
use crate::info::InfoAccumulator;
use crate::pool::{FilePool, Mode, PooledFile};
use crate::record::{Origin, Record};
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, warn};

#[derive(Default)]
pub(crate) struct Leaf {
    /// Records parsed so far, in file order.
    records: Vec<Record>,
    reader: Option<PooledFile>,
    exhausted: bool,
    writer: Option<PooledFile>,
    deleted: BTreeSet<String>,
    deleted_loaded: bool,
    /// Scan results keyed by filter string.
    memo: HashMap<String, InfoAccumulator>,
}

impl Leaf {
    /// Forget everything read from disk; the directory is being rebuilt.
    pub(crate) fn reset(&mut self) {
        *self = Leaf {
            deleted_loaded: true,
            ..Leaf::default()
        };
    }

    pub(crate) fn append(
        &mut self,
        pool: &Rc<FilePool>,
        dir: &Path,
        record: &Record,
    ) -> io::Result<()> {
        let writer = self
            .writer
            .get_or_insert_with(|| PooledFile::new(pool, dir.join(FILELIST), Mode::Write));
        writer.write_str(&record.to_line())
    }

    /// Close the writer and sort the flat file by path. Returns false when
    /// nothing was written since the last reset.
    pub(crate) fn finish(&mut self, pool: &Rc<FilePool>, dir: &Path) -> Result<bool, CacheError> {
        let writer = match self.writer.take() {
            Some(w) => w,
            None => return Ok(false),
        };
        writer.close()?;

        let path = dir.join(FILELIST);
        let text = pool.read_to_string(&path)?;
        let mut records = Vec::new();
        for line in text.lines() {
            match Record::parse_line(line) {
                Ok(r) => records.push(r),
                Err(e) => warn!(leaf = %dir.display(), error = %e, "dropping unparsable record"),
            }
        }
        records.sort_by(|a, b| a.path().cmp(b.path()));

        let mut sorted = String::with_capacity(text.len());
        for r in &records {
            sorted.push_str(&r.to_line());
        }
        pool.write_atomic(&path, sorted.as_bytes())?;
        debug!(leaf = %dir.display(), records = records.len(), "leaf sorted");
        Ok(true)
    }

    /// Make sure record `pos` is buffered, reading from disk as needed.
    /// Ok(false) at end of file. Lines that do not decode or parse are
    /// skipped. Any other read failure is returned; the handle keeps the
    /// offset of the failed line so a later call carries on from there.
    fn fill(
        &mut self,
        pool: &Rc<FilePool>,
        dir: &Path,
        origin: Origin,
        pos: usize,
    ) -> Result<bool, CacheError> {
        let mut line = Vec::new();
        while self.records.len() <= pos {
            if self.exhausted {
                return Ok(false);
            }
            let reader = self
                .reader
                .get_or_insert_with(|| PooledFile::new(pool, dir.join(FILELIST), Mode::Read));
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    self.exhausted = true;
                    self.reader = None;
                }
                Ok(_) => {
                    let parsed = std::str::from_utf8(&line)
                        .map_err(|e| CacheError::InvalidRecord(e.to_string()))
                        .and_then(Record::parse_line);
                    match parsed {
                        Ok(r) => self.records.push(r.with_origin(origin)),
                        Err(e) => warn!(
                            leaf = %dir.display(),
                            offset = reader.offset(),
                            error = %e,
                            "skipping malformed record"
                        ),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(leaf = %dir.display(), "leaf file missing, treating as empty");
                    self.exhausted = true;
                    self.reader = None;
                }
                Err(e) => {
                    warn!(
                        leaf = %dir.display(),
                        offset = reader.offset(),
                        error = %e,
                        "leaf read failed, will resume on next select"
                    );
                    return Err(CacheError::LeafRead {
                        leaf: dir.to_path_buf(),
                        source: e,
                    });
                }
            }
        }
        Ok(true)
    }

    /// Next record at or after `*pos` passing the deletion set and `filter`.
    pub(crate) fn next_matching(
        &mut self,
        pool: &Rc<FilePool>,
        dir: &Path,
        origin: Origin,
        pos: &mut usize,
        filter: Option<&Filter>,
        include_deleted: bool,
    ) -> Result<Option<Record>, CacheError> {
        loop {
            if !self.fill(pool, dir, origin, *pos)? {
                return Ok(None);
            }
            let record = &self.records[*pos];
            *pos += 1;
            if !include_deleted && self.deleted.contains(record.path()) {
                continue;
            }
            if filter.map_or(true, |f| f.selects(record)) {
                return Ok(Some(record.clone()));
            }
        }
    }

    /// True once the whole file has been read.
    #[cfg(test)]
    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub(crate) fn deleted_loaded(&self) -> bool {
        self.deleted_loaded
    }

    /// Merge a persisted deletion list into the in-memory set.
    pub(crate) fn load_deleted(&mut self, persisted: Option<String>) {
        self.deleted_loaded = true;
        if let Some(text) = persisted {
            self.deleted.extend(
                text.lines()
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
            );
        }
    }

    /// Mark a path deleted; false if it already was.
    pub(crate) fn mark_deleted(&mut self, path: &str) -> bool {
        let fresh = self.deleted.insert(path.to_string());
        if fresh {
            self.memo.clear();
        }
        fresh
    }

    pub(crate) fn deleted_paths(&self) -> impl Iterator<Item = &str> {
        self.deleted.iter().map(String::as_str)
    }

    pub(crate) fn memo(&self, key: &str) -> Option<&InfoAccumulator> {
        self.memo.get(key)
    }

    pub(crate) fn remember(&mut self, key: String, found: InfoAccumulator) {
        self.memo.insert(key, found);
    }
}
