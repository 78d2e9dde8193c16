mod cli;
mod config;
mod discover;
mod metrics;
mod model;
mod orchestrator;
mod runner;
mod storage;
mod strategy;

use std::{io, process};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::Config;
use storage::Storage;

/// Log filter variable, e.g. `STAGELINK_LOG=stagelink=debug`.
const LOG_ENV: &str = "STAGELINK_LOG";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = cli::Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            process::exit(1);
        }
    };

    let storage = match Storage::new(&config.scratch_dir) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to initialize storage: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = cli::run(cli, &config, &storage) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
