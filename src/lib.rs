//! Strata: Partitioned File-Metadata Caches
//!
//! Disk-resident caches of file metadata for very large directory trees.
//! Records are partitioned by week, size, dataset and owner so that
//! filtered queries and aggregate summaries only touch the partitions that
//! can match.

pub mod buckets;
pub mod cache;
pub mod cli;
pub mod config;
pub mod deletion_log;
pub mod error;
pub mod fileset;
pub mod filter;
pub mod format;
pub mod info;
pub mod logging;
pub mod merge;
pub mod pool;
pub mod record;
pub mod source;
