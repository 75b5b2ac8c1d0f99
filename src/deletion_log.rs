//! Deletion Log
//!
//! Every path the CLI removes is appended to a log named for the day
//! (`YYYYMMDD`, UTC). The log goes in the shared system directory when this
//! user may write there, otherwise in a per-user directory.

use crate::error::CacheError;
use crate::format::date_stamp;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where deletion logs are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeletionLogConfig {
    /// Shared log directory, tried first
    #[serde(default)]
    pub system_dir: Option<PathBuf>,

    /// Per-user fallback (None = the platform's local data dir under `strata/deletions`)
    #[serde(default)]
    pub user_dir: Option<PathBuf>,
}

impl DeletionLogConfig {
    pub fn resolved_user_dir(&self) -> Option<PathBuf> {
        self.user_dir.clone().or_else(|| {
            BaseDirs::new().map(|dirs| dirs.data_local_dir().join("strata").join("deletions"))
        })
    }
}

/// An open, append-only log of deleted paths.
pub struct DeletionLog {
    path: PathBuf,
    file: BufWriter<File>,
}

impl DeletionLog {
    /// Open today's log, falling back to the user directory when the system
    /// directory is missing or not writable.
    pub fn open(config: &DeletionLogConfig, now: i64) -> Result<Self, CacheError> {
        let name = date_stamp(now);
        if let Some(dir) = &config.system_dir {
            match open_in(dir, &name) {
                Ok(log) => return Ok(log),
                Err(e) if is_unusable(&e) => {
                    debug!(dir = %dir.display(), error = %e, "system deletion log unavailable");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let dir = config.resolved_user_dir().ok_or_else(|| {
            CacheError::ConfigError("no directory available for the deletion log".to_string())
        })?;
        Ok(open_in(&dir, &name)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, deleted: &Path) -> io::Result<()> {
        writeln!(self.file, "{}", deleted.display())
    }

    pub fn close(mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for DeletionLog {
    fn drop(&mut self) {
        if let Err(e) = self.file.flush() {
            warn!(log = %self.path.display(), error = %e, "failed to flush deletion log");
        }
    }
}

fn open_in(dir: &Path, name: &str) -> io::Result<DeletionLog> {
    // a failure here shows up again when opening the file
    let _ = fs::create_dir_all(dir);
    let path = dir.join(name);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    debug!(log = %path.display(), "deletion log opened");
    Ok(DeletionLog {
        path,
        file: BufWriter::new(file),
    })
}

fn is_unusable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound
    ) || matches!(
        e.raw_os_error(),
        Some(libc::EACCES) | Some(libc::EPERM) | Some(libc::EROFS) | Some(libc::ENOTDIR)
    )
}
