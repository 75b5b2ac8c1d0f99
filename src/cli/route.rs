//! CLI route: single route table and run context. Dispatches to the cache
//! engine and writes results to the given output.

use crate::cache::{Cache, UpdateOutcome};
use crate::cli::parse::{Commands, FilterArgs, InfoView};
use crate::config::{ConfigLoader, StrataConfig};
use crate::deletion_log::DeletionLog;
use crate::error::CacheError;
use crate::fileset::{Fileset, Union};
use crate::filter::Filter;
use crate::format::parse_size;
use crate::info::Info;
use crate::pool::FilePool;
use crate::record::Record;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

const DAY: i64 = 24 * 60 * 60;

/// Build a filter from command-line flags; `None` when no flag is given.
pub fn build_filter(args: &FilterArgs, now: i64) -> Result<Option<Filter>, CacheError> {
    let mut filter = Filter::default();
    if let Some(user) = &args.user {
        filter = filter.intersect(&Filter::owner(user.as_str()));
    }
    if let Some(dataset) = &args.dataset {
        filter = filter.intersect(&Filter::dataset(dataset.as_str()));
    }
    if let Some(size) = &args.size_geq {
        let size = parse_size(size)
            .map_err(|_| CacheError::InvalidFilter(format!("bad size '{}'", size)))?;
        filter = filter.intersect(&Filter::size_geq(size));
    }
    if let Some(days) = args.older_than {
        filter = filter.intersect(&Filter::modified_before(now - i64::from(days) * DAY));
    }
    if let Some(days) = args.newer_than {
        filter = filter.intersect(&Filter::modified_since(now - i64::from(days) * DAY));
    }
    for glob in &args.not_path {
        filter = filter.intersect(&Filter::excluding(glob)?);
    }
    for re in &args.regex {
        filter = filter.intersect(&Filter::matching(re)?);
    }
    Ok(if filter.is_empty() { None } else { Some(filter) })
}

/// Runtime context for CLI execution: configuration and the shared file pool.
pub struct RunContext {
    config: StrataConfig,
    pool: Rc<FilePool>,
}

impl RunContext {
    /// Create run context from workspace root and optional config path.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, CacheError> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: StrataConfig) -> Self {
        let pool = match config.max_open_files {
            Some(limit) => FilePool::with_limit(limit),
            None => FilePool::new(),
        };
        Self { config, pool }
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    fn cache(&self, name: &str) -> Result<Cache, CacheError> {
        Cache::from_config(name, self.config.cache(name)?, Rc::clone(&self.pool))
    }

    fn fileset(&self, name: &str) -> Result<Box<dyn Fileset>, CacheError> {
        let names: Vec<&str> = name.split(',').filter(|n| !n.is_empty()).collect();
        if let [single] = names.as_slice() {
            return Ok(Box::new(self.cache(single)?));
        }
        let mut union = Union::default();
        for n in names {
            union.push(Box::new(self.cache(n)?));
        }
        Ok(Box::new(union))
    }

    /// Execute a command, writing its results to `out`.
    pub fn execute(&self, command: &Commands, out: &mut dyn Write) -> Result<(), CacheError> {
        let now = chrono::Utc::now().timestamp();
        let result = match command {
            Commands::Update { names } => self.update(names, out),
            Commands::List => self.list(out),
            Commands::Find { name, filter, long } => {
                let filter = build_filter(filter, now)?;
                self.find(self.fileset(name)?.as_ref(), filter.as_ref(), *long, out)
            }
            Commands::Info { name, filter, by } => {
                let filter = build_filter(filter, now)?;
                self.info(self.fileset(name)?.as_ref(), filter.as_ref(), *by, out)
            }
            Commands::Delete {
                name,
                filter,
                dry_run,
            } => {
                let filter = build_filter(filter, now)?;
                self.delete(self.fileset(name)?.as_ref(), filter.as_ref(), *dry_run, now, out)
            }
        };
        match result {
            // reader went away, e.g. `strata find home | head`
            Err(CacheError::IoError(e)) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    }

    fn update(&self, names: &[String], out: &mut dyn Write) -> Result<(), CacheError> {
        let names: Vec<String> = if names.is_empty() {
            self.config.caches.keys().cloned().collect()
        } else {
            names.to_vec()
        };
        for name in names {
            let cache = self.cache(&name)?;
            match cache.update()? {
                UpdateOutcome::Updated { records } => {
                    writeln!(out, "{}: {} records", name, records)?
                }
                UpdateOutcome::Skipped => writeln!(out, "{}: skipped (permission denied)", name)?,
            }
        }
        Ok(())
    }

    fn list(&self, out: &mut dyn Write) -> Result<(), CacheError> {
        for name in self.config.caches.keys() {
            let cache = self.cache(name)?;
            writeln!(out, "{}", Fileset::describe(&cache))?;
        }
        Ok(())
    }

    fn find(
        &self,
        fileset: &dyn Fileset,
        filter: Option<&Filter>,
        long: bool,
        out: &mut dyn Write,
    ) -> Result<(), CacheError> {
        let mut width = 0;
        for record in fileset.select(filter)? {
            let record = record?;
            if long {
                let (line, w) = record.format(width);
                width = w;
                writeln!(out, "{}", line)?;
            } else {
                writeln!(out, "{}", record.path())?;
            }
        }
        Ok(())
    }

    fn info(
        &self,
        fileset: &dyn Fileset,
        filter: Option<&Filter>,
        by: InfoView,
        out: &mut dyn Write,
    ) -> Result<(), CacheError> {
        let acc = fileset.info(filter)?;
        writeln!(out, "{}", fileset.describe())?;
        if let Some(f) = filter {
            writeln!(out, "filter {}", f)?;
        }
        let body = match by {
            InfoView::Total => acc.fmt_total(),
            InfoView::Users => acc.fmt_users(),
            InfoView::Datasets => acc.fmt_datasets(),
            InfoView::Sizes => acc.fmt_sizes(),
        };
        writeln!(out, "{}", body)?;
        Ok(())
    }

    /// Remove matching files, deepest first so directories are emptied before
    /// they are removed, then record what went in the cache's delta files.
    /// Removed paths are appended to the day's deletion log, and parent
    /// directories get their modification times back afterwards.
    fn delete(
        &self,
        fileset: &dyn Fileset,
        filter: Option<&Filter>,
        dry_run: bool,
        now: i64,
        out: &mut dyn Write,
    ) -> Result<(), CacheError> {
        let records = fileset
            .select(filter)?
            .collect::<Result<Vec<Record>, _>>()?;
        let mut log = if dry_run {
            None
        } else {
            let log = DeletionLog::open(&self.config.deletion_log, now)?;
            info!(log = %log.path().display(), "logging deletions");
            Some(log)
        };
        let mut parents: BTreeMap<PathBuf, SystemTime> = BTreeMap::new();
        let mut removed = Info::default();
        let mut kept = 0u64;
        for record in records.iter().rev() {
            let root = match fileset.source_root(record) {
                Some(root) => root,
                None => {
                    warn!(path = record.path(), "no source directory for record, skipping");
                    kept += 1;
                    continue;
                }
            };
            let target = root.join(record.path());
            let log = match log.as_mut() {
                Some(log) => log,
                None => {
                    writeln!(out, "would delete {}", target.display())?;
                    removed.add(Info::of(record));
                    continue;
                }
            };
            if let Some(parent) = target.parent() {
                if !parents.contains_key(parent) {
                    if let Ok(mtime) = fs::metadata(parent).and_then(|m| m.modified()) {
                        parents.insert(parent.to_path_buf(), mtime);
                    }
                }
            }
            match remove_path(&target, record.is_dir()) {
                Ok(()) => {
                    debug!(path = %target.display(), "deleted");
                    log.record(&target)?;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %target.display(), "already gone")
                }
                Err(e) if is_expected_refusal(&e) => {
                    warn!(path = %target.display(), error = %e, "not deleted");
                    kept += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            fileset.delete(record)?;
            removed.add(Info::of(record));
        }
        if let Some(log) = log {
            log.close()?;
            let saved = fileset.save_deletions()?;
            info!(nodes = saved, "deletions saved");
            for (dir, mtime) in &parents {
                restore_mtime(dir, *mtime)?;
            }
        }
        let verb = if dry_run { "would delete" } else { "deleted" };
        writeln!(out, "{} {}", verb, removed)?;
        if kept > 0 {
            writeln!(out, "{} entries left in place", kept)?;
        }
        Ok(())
    }
}

/// Put back a directory's modification time. A directory that is gone, or
/// that belongs to someone else, is left alone.
fn restore_mtime(dir: &Path, mtime: SystemTime) -> io::Result<()> {
    match File::open(dir).and_then(|f| f.set_modified(mtime)) {
        Ok(()) => Ok(()),
        Err(e)
            if e.kind() == io::ErrorKind::NotFound
                || e.kind() == io::ErrorKind::PermissionDenied
                || matches!(e.raw_os_error(), Some(libc::EACCES) | Some(libc::EPERM)) =>
        {
            debug!(dir = %dir.display(), error = %e, "mtime not restored");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn remove_path(path: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    }
}

/// Failures that leave a file in place without aborting the whole delete.
fn is_expected_refusal(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::PermissionDenied
        || matches!(e.raw_os_error(), Some(libc::ENOTEMPTY) | Some(libc::EACCES))
}
