// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// caseindex - Incremental search index for Markdown test cases
///
/// Indexes "Test Case Name" documents below a project root and searches
/// them with CJK-aware keyword matching.
#[derive(Parser, Debug)]
#[command(name = "caseindex")]
#[command(
    author,
    version,
    about,
    long_about = None,
    after_help = "Quickstart:\n  caseindex index\n  caseindex search \"用户 登录\"\n  caseindex watch"
)]
pub struct Cli {
    /// Project root (defaults to current directory)
    #[arg(short, long, global = true)]
    pub root: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Compact JSON output (no pretty formatting)
    #[arg(long, global = true)]
    pub compact: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build or update the index
    #[command(visible_aliases = ["ix", "i"])]
    Index {
        /// Drop the index and rebuild it from scratch
        #[arg(short, long)]
        force: bool,
    },

    /// Search indexed test cases
    #[command(visible_aliases = ["s", "q"])]
    Search {
        /// Whitespace-separated keywords, all of which must match
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'm', long)]
        limit: Option<usize>,
    },

    /// List every indexed test case
    #[command(visible_aliases = ["ls"])]
    List,

    /// Show index statistics
    #[command(visible_aliases = ["st"])]
    Stats,

    /// Update the index, then keep it current until Ctrl+C
    #[command(visible_aliases = ["w"])]
    Watch,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
