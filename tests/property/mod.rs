//! Property-based tests for merging and aggregation

mod aggregate_properties;
mod merge_properties;
