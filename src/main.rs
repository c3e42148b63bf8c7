// SPDX-License-Identifier: MIT OR Apache-2.0

//! caseindex - Incremental search index for Markdown test cases

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use commands::Output;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CASEINDEX_LOG";

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let output = Output {
        format: cli.format,
        compact: cli.compact,
    };

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "caseindex", &mut std::io::stdout());
        return Ok(());
    }

    let root = commands::resolve_root(cli.root)?;
    let manager = commands::open(&root)?;

    match cli.command {
        Commands::Index { force } => commands::index(&manager, force, output)?,
        Commands::Search { query, limit } => commands::search(&manager, &query, limit, output)?,
        Commands::List => commands::list(&manager, output)?,
        Commands::Stats => commands::stats(&manager, output)?,
        Commands::Watch => commands::watch(&manager, output)?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
