// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command implementations and result rendering

use anyhow::{Context, Result};
use caseindex::{IndexManager, IndexStatistics, SearchHit, TestCaseRecord};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cli::OutputFormat;

/// How results are printed.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub format: OutputFormat,
    pub compact: bool,
}

impl Output {
    fn json<T: Serialize>(&self, value: &T) -> Result<()> {
        let rendered = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        println!("{rendered}");
        Ok(())
    }
}

pub fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    match root {
        Some(root) => Ok(root),
        None => std::env::current_dir().context("failed to read current directory"),
    }
}

pub fn open(root: &Path) -> Result<IndexManager> {
    IndexManager::open(root).with_context(|| format!("failed to open index at {}", root.display()))
}

pub fn index(manager: &IndexManager, force: bool, output: Output) -> Result<()> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}/{len} files | Indexing")
            .expect("valid progress bar template")
            .progress_chars("##."),
    );
    if output.format == OutputFormat::Json {
        bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let progress_bar = bar.clone();
    let progress = move |done: usize, total: usize| {
        progress_bar.set_length(total as u64);
        progress_bar.set_position(done as u64);
    };
    let report = manager
        .build_index_with_progress(force, Some(&progress))
        .context("index build failed")?;
    bar.finish_and_clear();

    match output.format {
        OutputFormat::Json => output.json(&report),
        OutputFormat::Text => {
            println!(
                "{} Indexed {} files ({} new, {} modified, {} unchanged, {} removed) in {}ms",
                "✓".green(),
                report.parsed().to_string().bold(),
                report.added,
                report.modified,
                report.unchanged,
                report.deleted,
                report.elapsed_ms
            );
            if report.unreadable > 0 {
                println!("{} {} files could not be read", "!".yellow(), report.unreadable);
            }
            if report.failed > 0 {
                println!("{} {} files could not be indexed", "!".yellow(), report.failed);
            }
            Ok(())
        }
    }
}

pub fn search(
    manager: &IndexManager,
    query: &str,
    limit: Option<usize>,
    output: Output,
) -> Result<()> {
    let hits = manager.search_with_limit(query, limit);
    match output.format {
        OutputFormat::Json => output.json(&hits),
        OutputFormat::Text => {
            if hits.is_empty() {
                println!("{} No test cases match '{}'", "✗".red(), query);
                return Ok(());
            }
            for hit in &hits {
                print_hit(hit);
            }
            println!("\n{} {} results", "✓".green(), hits.len());
            Ok(())
        }
    }
}

fn print_hit(hit: &SearchHit) {
    let record = &hit.record;
    let number = if record.number.is_empty() {
        String::new()
    } else {
        format!(" [{}]", record.number)
    };
    println!(
        "\n{}{} {}",
        render_marks(&hit.snippets.name).bold(),
        number.dimmed(),
        record.file_path.cyan()
    );
    let fields = [
        ("preconditions", &hit.snippets.preconditions),
        ("steps", &hit.snippets.steps),
        ("expected", &hit.snippets.expected_results),
        ("notes", &hit.snippets.notes),
    ];
    for (label, snippet) in fields {
        if snippet.contains("<mark>") {
            println!("  {}: {}", label.dimmed(), render_marks(snippet).replace('\n', " "));
        }
    }
}

/// Replace `<mark>` tags with terminal highlighting.
fn render_marks(snippet: &str) -> String {
    let mut rendered = String::with_capacity(snippet.len());
    let mut rest = snippet;
    while let Some(open) = rest.find("<mark>") {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + "<mark>".len()..];
        match after.find("</mark>") {
            Some(close) => {
                rendered.push_str(&after[..close].yellow().bold().to_string());
                rest = &after[close + "</mark>".len()..];
            }
            None => {
                rest = after;
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

pub fn list(manager: &IndexManager, output: Output) -> Result<()> {
    let records = manager.get_all_records()?;
    match output.format {
        OutputFormat::Json => output.json(&records),
        OutputFormat::Text => {
            for record in &records {
                print_record(record);
            }
            println!("{} {} test cases", "✓".green(), records.len());
            Ok(())
        }
    }
}

fn print_record(record: &TestCaseRecord) {
    if record.number.is_empty() {
        println!("{}  {}", record.name.bold(), record.file_path.cyan());
    } else {
        println!(
            "{} {}  {}",
            record.number.dimmed(),
            record.name.bold(),
            record.file_path.cyan()
        );
    }
}

pub fn stats(manager: &IndexManager, output: Output) -> Result<()> {
    let stats = manager.get_statistics()?;
    match output.format {
        OutputFormat::Json => output.json(&stats),
        OutputFormat::Text => {
            print_stats(manager.root(), &stats);
            Ok(())
        }
    }
}

fn print_stats(root: &Path, stats: &IndexStatistics) {
    println!("{} {}", "Index:".bold(), root.display());
    println!("  test cases     {}", stats.record_count);
    println!("  files          {}", stats.file_count);
    println!("  tracked files  {}", stats.tracked_files);
    match stats.last_index_time {
        Some(ms) => println!("  last indexed   {ms} (unix ms)"),
        None => println!("  last indexed   {}", "never".yellow()),
    }
}

pub fn watch(manager: &IndexManager, output: Output) -> Result<()> {
    index(manager, false, output)?;
    manager.start_watching()?;
    if output.format == OutputFormat::Text {
        println!(
            "{} Watching {} for changes...",
            "👁".cyan(),
            manager.root().display()
        );
        println!("Press Ctrl+C to stop\n");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start signal runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("failed to wait for Ctrl+C")?;

    manager.stop_watching();
    if output.format == OutputFormat::Text {
        println!("{} Watcher stopped", "✓".green());
    }
    Ok(())
}
