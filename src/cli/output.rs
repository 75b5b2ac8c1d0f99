//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::CacheError;

/// Map domain errors to a string for CLI output.
pub fn map_error(e: &CacheError) -> String {
    match e {
        CacheError::MissingCache(_) | CacheError::UnknownCache(_) => e.to_string(),
        CacheError::ConfigError(_) | CacheError::InvalidPartitionKind(_) => {
            format!("{} (check your strata configuration)", e)
        }
        _ => format!("strata: {}", e),
    }
}
