//! Strata CLI Binary
//!
//! Command-line interface for partitioned file-metadata caches.

use anyhow::Context;
use clap::Parser;
use std::io::{self, Write};
use std::process;
use strata::cli::{map_error, Cli, RunContext};
use strata::config::ConfigLoader;
use strata::error::CacheError;
use strata::logging::{init_logging, LoggingConfig};
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        // Domain errors get the stable CLI wording; anything else is
        // printed with its context chain.
        match e.downcast_ref::<CacheError>() {
            Some(cache_error) => eprintln!("{}", map_error(cache_error)),
            None => eprintln!("strata: {:#}", e),
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let logging_config = build_logging_config(&cli);
    init_logging(Some(&logging_config)).context("failed to initialize logging")?;

    info!("strata starting");

    let context = RunContext::new(cli.workspace.clone(), cli.config.clone())?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = context.execute(&cli.command, &mut out) {
        error!("command failed: {}", e);
        return Err(e.into());
    }
    out.flush().or_else(|e| match e.kind() {
        io::ErrorKind::BrokenPipe => Ok(()),
        _ => Err(e),
    })?;
    info!("command completed");
    Ok(())
}

/// Build logging configuration from CLI args and the config file.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = match cli.config {
        Some(ref config_path) => ConfigLoader::load_from_file(config_path)
            .map(|c| c.logging)
            .unwrap_or_default(),
        None => ConfigLoader::load(&cli.workspace)
            .map(|c| c.logging)
            .unwrap_or_default(),
    };

    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        config.file = file.clone();
    }

    config
}
