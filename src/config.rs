//! Configuration System
//!
//! Named caches and logging settings, layered from defaults, the user's
//! global config file, workspace config files and `STRATA__` environment
//! variables. Validation failures are fatal: a cache pointed at the wrong
//! directory must never be purged or rebuilt.

use crate::cache::Layout;
use crate::deletion_log::DeletionLogConfig;
use crate::error::CacheError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

mod facade;
mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Cache definitions by name
    #[serde(default)]
    pub caches: BTreeMap<String, CacheConfig>,

    /// Budget of simultaneously open cache files (None = until the OS refuses)
    #[serde(default)]
    pub max_open_files: Option<usize>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where `delete` records the paths it removed
    #[serde(default)]
    pub deletion_log: DeletionLogConfig,
}

/// One cache: where it lives, what it indexes and how it is partitioned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache root directory
    #[serde(default)]
    pub path: PathBuf,

    /// Directory holding deletions made since the last update
    #[serde(default)]
    pub delta_dir: PathBuf,

    /// Directory tree the cache indexes
    #[serde(default)]
    pub source: PathBuf,

    /// Partition order, outermost first (weekly, size, dataset, user)
    #[serde(default)]
    pub partitions: Vec<String>,

    /// Size bucket boundaries such as "1M"
    #[serde(default)]
    pub size_buckets: Vec<String>,

    /// Leading path components forming a record's dataset
    #[serde(default)]
    pub dataset_depth: Option<usize>,

    /// Entry names skipped while walking the source
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl CacheConfig {
    /// Validate one cache definition
    pub fn validate(&self, name: &str) -> Result<(), CacheError> {
        let fail = |msg: &str| Err(CacheError::ConfigError(format!("cache '{}': {}", name, msg)));
        if self.path.as_os_str().is_empty() {
            return fail("path cannot be empty");
        }
        if self.delta_dir.as_os_str().is_empty() {
            return fail("delta_dir cannot be empty");
        }
        if self.source.as_os_str().is_empty() {
            return fail("source cannot be empty");
        }
        if self.delta_dir == self.path {
            return fail("delta_dir must differ from path");
        }
        Layout::from_names(&self.partitions, &self.size_buckets).map_err(|e| match e {
            CacheError::ConfigError(msg) => {
                CacheError::ConfigError(format!("cache '{}': {}", name, msg))
            }
            other => other,
        })?;
        Ok(())
    }
}

impl StrataConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), CacheError> {
        for (name, cache) in &self.caches {
            cache.validate(name)?;
        }
        if self.max_open_files == Some(0) {
            return Err(CacheError::ConfigError(
                "max_open_files must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Look up a cache by name.
    pub fn cache(&self, name: &str) -> Result<&CacheConfig, CacheError> {
        self.caches
            .get(name)
            .ok_or_else(|| CacheError::UnknownCache(name.to_string()))
    }
}
