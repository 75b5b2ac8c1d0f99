//! Pooled file handles
//!
//! A cache tree can have far more live partitions than the process may hold
//! open descriptors. Every file the engine touches goes through a
//! [`FilePool`]: handles open lazily on first read or write, and when an open
//! fails with "too many open files" (or the pool's own budget is reached)
//! every pooled handle is flushed and the open is retried exactly once.
//!
//! Flushing closes the OS file but keeps the handle usable: readers remember
//! their byte offset and seek back on reopen, writers reopen in append mode.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    /// Truncate on first open.
    Write,
    Append,
}

enum OpenFile {
    Reader(BufReader<File>),
    Writer(BufWriter<File>),
}

struct Slot {
    path: PathBuf,
    mode: Mode,
    file: Option<OpenFile>,
    offset: u64,
}

impl Slot {
    fn open(&mut self) -> io::Result<()> {
        let file = match self.mode {
            Mode::Read => {
                let mut f = File::open(&self.path)?;
                if self.offset > 0 {
                    f.seek(SeekFrom::Start(self.offset))?;
                }
                OpenFile::Reader(BufReader::new(f))
            }
            Mode::Write => OpenFile::Writer(BufWriter::new(File::create(&self.path)?)),
            Mode::Append => OpenFile::Writer(BufWriter::new(
                OpenOptions::new().create(true).append(true).open(&self.path)?,
            )),
        };
        self.file = Some(file);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(OpenFile::Writer(mut w)) => {
                // later writes must not truncate what is already there
                self.mode = Mode::Append;
                w.flush()
            }
            Some(OpenFile::Reader(_)) | None => Ok(()),
        }
    }
}

#[derive(Default)]
struct PoolInner {
    slots: HashMap<u64, Slot>,
    next_id: u64,
    flushes: u64,
}

impl PoolInner {
    fn open_count(&self) -> usize {
        self.slots.values().filter(|s| s.file.is_some()).count()
    }

    fn flush_all(&mut self) -> io::Result<()> {
        self.flushes += 1;
        let mut first_err = None;
        for slot in self.slots.values_mut() {
            if let Err(e) = slot.flush() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Whether an error means the process (or system) ran out of descriptors.
pub fn is_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

/// Process-wide set of pooled handles for one cache session.
pub struct FilePool {
    inner: RefCell<PoolInner>,
    limit: Option<usize>,
}

impl FilePool {
    pub fn new() -> Rc<Self> {
        Rc::new(FilePool {
            inner: RefCell::new(PoolInner::default()),
            limit: None,
        })
    }

    /// Pool that also treats reaching `limit` open handles as exhaustion.
    pub fn with_limit(limit: usize) -> Rc<Self> {
        Rc::new(FilePool {
            inner: RefCell::new(PoolInner::default()),
            limit: Some(limit.max(1)),
        })
    }

    /// Close every open pooled handle, keeping their positions.
    pub fn flush_all(&self) -> io::Result<()> {
        debug!("flushing all pooled files");
        self.inner.borrow_mut().flush_all()
    }

    pub fn open_count(&self) -> usize {
        self.inner.borrow().open_count()
    }

    /// How many times the pool has been flushed.
    pub fn flush_count(&self) -> u64 {
        self.inner.borrow().flushes
    }

    fn at_limit(&self, inner: &PoolInner) -> bool {
        self.limit.map_or(false, |l| inner.open_count() >= l)
    }

    /// Run an operation that needs a descriptor of its own, applying the
    /// flush-and-retry-once policy.
    fn retry<T>(&self, path: &Path, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
        {
            let mut inner = self.inner.borrow_mut();
            if self.at_limit(&inner) {
                inner.flush_all()?;
            }
        }
        match op() {
            Err(e) if is_exhaustion(&e) => {
                debug!(path = %path.display(), "out of file descriptors, flushing pool");
                self.flush_all()?;
                op()
            }
            other => other,
        }
    }

    /// Names in a directory, with the pool's retry policy around `readdir`.
    pub fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        self.retry(path, || {
            let mut names = Vec::new();
            for entry in fs::read_dir(path)? {
                names.push(entry?.file_name().to_string_lossy().into_owned());
            }
            Ok(names)
        })
    }

    pub fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.retry(path, || fs::read_to_string(path))
    }

    /// Write `contents` to a `.tmp` sibling and rename it over `path`.
    pub fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let tmp = tmp_path(path);
        self.retry(path, || fs::write(&tmp, contents))?;
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            e
        })
    }

    fn register(&self, path: PathBuf, mode: Mode) -> u64 {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.slots.insert(
            id,
            Slot {
                path,
                mode,
                file: None,
                offset: 0,
            },
        );
        id
    }

    /// Run `op` against slot `id`, opening it first if needed.
    fn with_open<T>(&self, id: u64, op: impl FnOnce(&mut Slot) -> io::Result<T>) -> io::Result<T> {
        let mut inner = self.inner.borrow_mut();
        let needs_open = inner.slots.get(&id).map_or(false, |s| s.file.is_none());
        if needs_open {
            if self.at_limit(&inner) {
                inner.flush_all()?;
            }
            let first = match inner.slots.get_mut(&id) {
                Some(slot) => slot.open(),
                None => Ok(()),
            };
            if let Err(e) = first {
                if !is_exhaustion(&e) {
                    return Err(e);
                }
                if let Some(slot) = inner.slots.get(&id) {
                    debug!(path = %slot.path.display(), "out of file descriptors, flushing pool");
                }
                inner.flush_all()?;
                if let Some(slot) = inner.slots.get_mut(&id) {
                    slot.open()?;
                }
            }
        }
        match inner.slots.get_mut(&id) {
            Some(slot) => op(slot),
            None => Err(io::Error::new(io::ErrorKind::Other, "pooled file already closed")),
        }
    }
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// A file handle that survives descriptor exhaustion.
pub struct PooledFile {
    pool: Rc<FilePool>,
    id: u64,
    closed: bool,
}

impl PooledFile {
    /// Register a handle; nothing is opened until the first read or write.
    pub fn new(pool: &Rc<FilePool>, path: impl Into<PathBuf>, mode: Mode) -> Self {
        let id = pool.register(path.into(), mode);
        PooledFile {
            pool: Rc::clone(pool),
            id,
            closed: false,
        }
    }

    /// Append one raw line (newline included) to `buf`; 0 at end of file.
    ///
    /// Bytes are not decoded here, so a line that is not UTF-8 still moves
    /// the handle past it. A failed read releases the OS file and leaves the
    /// offset at the start of the line, so the next call reopens and reads
    /// that line again whole.
    pub fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.pool.with_open(self.id, |slot| match slot.file.as_mut() {
            Some(OpenFile::Reader(r)) => {
                let start = buf.len();
                match r.read_until(b'\n', buf) {
                    Ok(n) => {
                        slot.offset += n as u64;
                        Ok(n)
                    }
                    Err(e) => {
                        buf.truncate(start);
                        slot.file = None;
                        Err(e)
                    }
                }
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "read on pooled file opened for write",
            )),
        })
    }

    pub fn write_str(&mut self, s: &str) -> io::Result<()> {
        self.pool.with_open(self.id, |slot| match slot.file.as_mut() {
            Some(OpenFile::Writer(w)) => w.write_all(s.as_bytes()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write on pooled file opened for read",
            )),
        })
    }

    /// Byte offset of the next read.
    pub fn offset(&self) -> u64 {
        self.pool
            .inner
            .borrow()
            .slots
            .get(&self.id)
            .map_or(0, |s| s.offset)
    }

    /// Reposition a reader; takes effect now or on the next reopen.
    pub fn seek(&mut self, offset: u64) -> io::Result<()> {
        let mut inner = self.pool.inner.borrow_mut();
        let slot = inner
            .slots
            .get_mut(&self.id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "pooled file already closed"))?;
        if slot.mode != Mode::Read {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek on pooled file opened for write",
            ));
        }
        if let Some(OpenFile::Reader(r)) = slot.file.as_mut() {
            r.seek(SeekFrom::Start(offset))?;
        }
        slot.offset = offset;
        Ok(())
    }

    /// Flush and release the handle, reporting any write error.
    pub fn close(mut self) -> io::Result<()> {
        self.closed = true;
        let slot = self.pool.inner.borrow_mut().slots.remove(&self.id);
        match slot {
            Some(mut slot) => slot.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for PooledFile {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Ok(mut inner) = self.pool.inner.try_borrow_mut() {
            if let Some(mut slot) = inner.slots.remove(&self.id) {
                if let Err(e) = slot.flush() {
                    tracing::warn!(path = %slot.path.display(), error = %e, "failed to flush pooled file");
                }
            }
        }
    }
}
