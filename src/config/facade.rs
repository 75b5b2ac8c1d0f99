//! Config loader: assembles the layered sources and validates the result.

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::StrataConfig;
use crate::error::CacheError;
use config::{Environment, File};
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence (lowest to highest): defaults, global config file,
    /// `config/config.toml`, `config/{STRATA_ENV}.toml`, `STRATA__*`
    /// environment variables.
    pub fn load(workspace_root: &Path) -> Result<StrataConfig, CacheError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = builder.add_source(Environment::with_prefix("STRATA").separator("__"));
        let config: StrataConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from one file on top of the defaults.
    pub fn load_from_file(path: &Path) -> Result<StrataConfig, CacheError> {
        let config: StrataConfig = merge_policy::builder_with_defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Location of the user-level config file, if a home directory is known.
    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    /// Built-in defaults only.
    pub fn defaults() -> Result<StrataConfig, CacheError> {
        Ok(merge_policy::builder_with_defaults()?
            .build()?
            .try_deserialize()?)
    }
}
