//! Integration tests for layered configuration loading

use std::fs;
use strata::config::ConfigLoader;
use strata::error::CacheError;
use tempfile::TempDir;

use crate::integration::with_config_env;

#[test]
fn test_workspace_config_overrides_global() {
    let temp = TempDir::new().unwrap();
    with_config_env(&temp, || {
        let global_dir = temp.path().join("xdg").join("strata");
        fs::create_dir_all(&global_dir).unwrap();
        fs::write(
            global_dir.join("config.toml"),
            r#"
max_open_files = 32

[caches.home]
path = "/var/cache/strata/home"
delta_dir = "/var/cache/strata/home.deltas"
source = "/home"
"#,
        )
        .unwrap();

        let workspace = temp.path().join("ws");
        fs::create_dir_all(workspace.join("config")).unwrap();
        fs::write(
            workspace.join("config").join("config.toml"),
            r#"
max_open_files = 128

[caches.scratch]
path = "/var/cache/strata/scratch"
delta_dir = "/var/cache/strata/scratch.deltas"
source = "/scratch"
partitions = ["size", "dataset"]
size_buckets = ["1M", "1G"]
ignore = [".snapshot"]
"#,
        )
        .unwrap();

        let config = ConfigLoader::load(&workspace).unwrap();
        assert_eq!(config.max_open_files, Some(128));
        assert_eq!(config.caches.len(), 2);
        assert_eq!(config.cache("home").unwrap().source.to_str(), Some("/home"));
        let scratch = config.cache("scratch").unwrap();
        assert_eq!(scratch.partitions, vec!["size", "dataset"]);
        assert_eq!(scratch.ignore, vec![".snapshot"]);
        assert_eq!(config.logging.level, "warn");
    });
}

#[test]
fn test_no_config_files_yields_defaults() {
    let temp = TempDir::new().unwrap();
    with_config_env(&temp, || {
        let config = ConfigLoader::load(temp.path()).unwrap();
        assert!(config.caches.is_empty());
        assert_eq!(config.max_open_files, None);
        assert_eq!(config.logging.output, "stderr");
    });
}

#[test]
fn test_invalid_cache_definition_is_rejected() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("strata.toml");
    fs::write(
        &file,
        r#"
[caches.home]
path = "/var/cache/strata/home"
delta_dir = "/var/cache/strata/home.deltas"
source = "/home"
partitions = ["monthly"]
"#,
    )
    .unwrap();
    assert!(matches!(
        ConfigLoader::load_from_file(&file),
        Err(CacheError::InvalidPartitionKind(_))
    ));
}

#[test]
fn test_global_config_path_follows_xdg() {
    let temp = TempDir::new().unwrap();
    with_config_env(&temp, || {
        let path = ConfigLoader::global_config_path().unwrap();
        assert_eq!(path, temp.path().join("xdg").join("strata").join("config.toml"));
    });
}
