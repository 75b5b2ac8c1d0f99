//! Integration tests for partitioned metadata caches

mod cache_scenarios;
mod cli_commands;
mod config_integration;
mod deletion;
mod pooling;
mod staleness;
mod test_utils;

pub use test_utils::*;
