//! Integration tests for the command route over real directory trees

use std::fs;
use strata::cli::{Commands, FilterArgs, InfoView, RunContext};
use strata::config::{CacheConfig, StrataConfig};
use tempfile::TempDir;

fn context(temp: &TempDir) -> RunContext {
    let mut config = StrataConfig::default();
    for name in ["left", "right"] {
        let source = temp.path().join(name);
        fs::create_dir_all(source.join("data")).unwrap();
        fs::write(source.join("data").join(format!("{}.log", name)), "0123456789").unwrap();
        fs::create_dir_all(source.join(".snapshot")).unwrap();
        fs::write(source.join(".snapshot").join("old"), "x").unwrap();
        config.caches.insert(
            name.to_string(),
            CacheConfig {
                path: temp.path().join("caches").join(name),
                delta_dir: temp.path().join("deltas").join(name),
                source,
                partitions: vec!["dataset".to_string(), "user".to_string()],
                dataset_depth: Some(1),
                ignore: vec![".snapshot".to_string()],
                ..Default::default()
            },
        );
    }
    config.max_open_files = Some(4);
    config.deletion_log.user_dir = Some(temp.path().join("deletions"));
    RunContext::from_config(config)
}

fn run(ctx: &RunContext, command: Commands) -> String {
    let mut out = Vec::new();
    ctx.execute(&command, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

fn find(name: &str, filter: FilterArgs) -> Commands {
    Commands::Find {
        name: name.to_string(),
        filter,
        long: false,
    }
}

#[test]
fn test_update_all_and_list() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let listing = run(&ctx, Commands::List);
    assert_eq!(listing.matches("<missing-cache>").count(), 2);

    let out = run(&ctx, Commands::Update { names: vec![] });
    assert_eq!(out, "left: 2 records\nright: 2 records\n");

    let listing = run(&ctx, Commands::List);
    assert!(!listing.contains("<missing-cache>"));
    assert!(listing.contains(" cached "));
}

#[test]
fn test_find_honours_ignore_and_dataset() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    run(&ctx, Commands::Update { names: vec![] });

    assert_eq!(
        run(&ctx, find("left", FilterArgs::default())),
        "data\ndata/left.log\n"
    );
    let by_dataset = FilterArgs {
        dataset: Some("data".to_string()),
        regex: vec![r"\.log$".to_string()],
        ..Default::default()
    };
    assert_eq!(run(&ctx, find("right", by_dataset)), "data/right.log\n");
}

#[test]
fn test_union_of_caches() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    run(&ctx, Commands::Update { names: vec![] });

    let logs = FilterArgs {
        regex: vec![r"\.log$".to_string()],
        ..Default::default()
    };
    assert_eq!(
        run(&ctx, find("left,right", logs.clone())),
        "data/left.log\ndata/right.log\n"
    );

    let info = run(
        &ctx,
        Commands::Info {
            name: "left,right".to_string(),
            filter: logs,
            by: InfoView::Total,
        },
    );
    assert!(info.contains("total 20 in 2 files"), "{}", info);
}

#[test]
fn test_delete_then_find() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    run(&ctx, Commands::Update { names: vec![] });

    let out = run(
        &ctx,
        Commands::Delete {
            name: "left".to_string(),
            filter: FilterArgs::default(),
            dry_run: false,
        },
    );
    assert!(out.starts_with("deleted "), "{}", out);
    assert!(!temp.path().join("left").join("data").exists());
    let log = fs::read_dir(temp.path().join("deletions"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let logged = fs::read_to_string(log).unwrap();
    assert!(logged.contains("left.log"), "{}", logged);
    assert!(temp.path().join("left").join(".snapshot").exists());
    assert_eq!(run(&ctx, find("left", FilterArgs::default())), "");
    assert_eq!(
        run(&ctx, find("right", FilterArgs::default())),
        "data\ndata/right.log\n"
    );
}

#[test]
fn test_dataset_with_spaces_round_trips_through_delete() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    fs::create_dir_all(source.join("My Project")).unwrap();
    fs::write(source.join("My Project").join("f.txt"), "abc").unwrap();
    fs::write(source.join(" lead"), "x").unwrap();
    let mut config = StrataConfig::default();
    config.caches.insert(
        "spaced".to_string(),
        CacheConfig {
            path: temp.path().join("cache"),
            delta_dir: temp.path().join("deltas"),
            source: source.clone(),
            partitions: vec!["dataset".to_string()],
            dataset_depth: Some(1),
            ..Default::default()
        },
    );
    config.deletion_log.user_dir = Some(temp.path().join("deletions"));
    let ctx = RunContext::from_config(config);
    run(&ctx, Commands::Update { names: vec![] });

    let in_project = FilterArgs {
        dataset: Some("My Project".to_string()),
        ..Default::default()
    };
    assert_eq!(
        run(&ctx, find("spaced", in_project)),
        "My Project/f.txt\n"
    );

    let lead_only = FilterArgs {
        regex: vec!["^ lead$".to_string()],
        ..Default::default()
    };
    run(
        &ctx,
        Commands::Delete {
            name: "spaced".to_string(),
            filter: lead_only,
            dry_run: false,
        },
    );
    assert!(!source.join(" lead").exists());
    assert!(source.join("My Project").join("f.txt").exists());
}
