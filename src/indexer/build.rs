// SPDX-License-Identifier: MIT OR Apache-2.0

//! Incremental index builds
//!
//! Scan, diff against stored metadata, then re-parse changed documents in
//! batches. Each batch is one transaction and each file inside it is one
//! savepoint, so a bad file only loses its own rows.

use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::errors::{IndexError, Result};
use crate::indexer::changes::{compute_changes, hash_bytes, ChangedFile};
use crate::indexer::retry::with_lock_retry;
use crate::indexer::scanner::{file_mtime_nanos, FileScanner};
use crate::indexer::store::{
    now_unix_ms, replace_file_records, FileFingerprint, IndexStore, LAST_INDEX_TIME_KEY,
};
use crate::parser::{parse, TestCaseRecord};

/// Progress callback, called with `(processed, total)` after every batch.
pub type ProgressFn = dyn Fn(usize, usize) + Sync;

/// Outcome of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub scanned: usize,
    pub added: usize,
    pub modified: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Files that could not be fingerprinted; their stored rows are kept
    pub unreadable: usize,
    /// Added or modified files that could not be read or written
    pub failed: usize,
    pub records_written: usize,
    pub elapsed_ms: u64,
}

impl BuildReport {
    /// Documents parsed and stored in this build.
    pub fn parsed(&self) -> usize {
        (self.added + self.modified).saturating_sub(self.failed)
    }
}

/// A document read and parsed, ready to be written.
#[derive(Debug, Clone)]
pub(crate) struct PreparedFile {
    pub rel: String,
    pub fingerprint: FileFingerprint,
    pub records: Vec<TestCaseRecord>,
}

/// Read, hash and parse one document. The fingerprint describes exactly the
/// bytes that were parsed.
pub(crate) fn prepare_file(rel: &str, abs: &Path) -> Result<PreparedFile> {
    let metadata = std::fs::metadata(abs).map_err(|e| IndexError::io(abs, e))?;
    let bytes = std::fs::read(abs).map_err(|e| IndexError::io(abs, e))?;
    let content = String::from_utf8_lossy(&bytes);
    Ok(PreparedFile {
        rel: rel.to_string(),
        fingerprint: FileFingerprint {
            mtime: file_mtime_nanos(&metadata),
            content_hash: hash_bytes(&bytes),
        },
        records: parse(rel, &content),
    })
}

#[derive(Debug, Default)]
struct BatchOutcome {
    written: usize,
    records: usize,
    failed: usize,
}

pub struct IndexBuilder<'a> {
    root: &'a Path,
    config: &'a IndexConfig,
    store: &'a IndexStore,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(root: &'a Path, config: &'a IndexConfig, store: &'a IndexStore) -> Self {
        Self {
            root,
            config,
            store,
        }
    }

    /// Bring the store in line with the documents on disk.
    ///
    /// Corruption errors are returned to the caller, which decides whether
    /// to rebuild from scratch.
    pub fn build(&self, progress: Option<&ProgressFn>) -> Result<BuildReport> {
        let started = Instant::now();
        let files = FileScanner::from_config(self.root, self.config).list_files();
        let stored = self.store.load_metadata()?;
        let changes = compute_changes(self.root, &files, &stored);

        let mut report = BuildReport {
            scanned: files.len(),
            added: changes.added.len(),
            modified: changes.modified.len(),
            unchanged: changes.unchanged,
            deleted: changes.deleted.len(),
            unreadable: changes.unreadable,
            ..BuildReport::default()
        };
        debug!(
            scanned = report.scanned,
            added = report.added,
            modified = report.modified,
            deleted = report.deleted,
            "change detection finished"
        );

        let changed = changes.changed();
        let total = changed.len();
        let mut processed = 0;
        for batch in changed.chunks(self.config.batch_size) {
            let outcome = self.index_batch(batch)?;
            report.records_written += outcome.records;
            report.failed += outcome.failed;
            processed += batch.len();
            if let Some(progress) = progress {
                progress(processed, total);
            }
        }

        if !changes.deleted.is_empty() {
            let removed = with_lock_retry(self.config, "orphan cleanup", || {
                self.store.remove_files(&changes.deleted)
            })?;
            debug!(files = changes.deleted.len(), records = removed, "orphans removed");
        }

        self.store
            .set_state(LAST_INDEX_TIME_KEY, &now_unix_ms().to_string())?;

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            parsed = report.parsed(),
            unchanged = report.unchanged,
            deleted = report.deleted,
            unreadable = report.unreadable,
            failed = report.failed,
            elapsed_ms = report.elapsed_ms,
            "index build finished"
        );
        Ok(report)
    }

    fn index_batch(&self, batch: &[ChangedFile]) -> Result<BatchOutcome> {
        let prepared: Vec<Result<PreparedFile>> = batch
            .par_iter()
            .map(|file| prepare_file(&file.rel, &file.abs))
            .collect();

        let mut ready = Vec::with_capacity(prepared.len());
        let mut unreadable = 0;
        for result in prepared {
            match result {
                Ok(file) => ready.push(file),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable document");
                    unreadable += 1;
                }
            }
        }

        let mut outcome = match with_lock_retry(self.config, "batch write", || {
            self.write_batch(&ready)
        }) {
            Ok(outcome) => outcome,
            Err(e) if e.is_locked() => {
                warn!(
                    files = ready.len(),
                    error = %e,
                    "batch still locked, writing files one by one"
                );
                self.write_each(&ready)?
            }
            Err(e) => return Err(e),
        };
        outcome.failed += unreadable;
        Ok(outcome)
    }

    /// Write every file in its own transaction. A file that stays locked is
    /// abandoned and the rest still go in.
    fn write_each(&self, files: &[PreparedFile]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for file in files {
            let result = with_lock_retry(self.config, &file.rel, || {
                let mut conn = self.store.connect()?;
                let tx = conn.transaction()?;
                replace_file_records(&tx, &file.rel, &file.records, &file.fingerprint)?;
                tx.commit()?;
                Ok(())
            });
            match result {
                Ok(()) => {
                    outcome.written += 1;
                    outcome.records += file.records.len();
                }
                Err(e) if e.is_corruption() => return Err(e),
                Err(e) => {
                    warn!(path = %file.rel, error = %e, "abandoning document after retries");
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }

    fn write_batch(&self, files: &[PreparedFile]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if files.is_empty() {
            return Ok(outcome);
        }

        let mut conn = self.store.connect()?;
        let mut tx = conn.transaction()?;
        for file in files {
            let savepoint = tx.savepoint()?;
            match replace_file_records(&savepoint, &file.rel, &file.records, &file.fingerprint) {
                Ok(()) => {
                    savepoint.commit()?;
                    outcome.written += 1;
                    outcome.records += file.records.len();
                }
                Err(e) if e.is_locked() || e.is_corruption() => return Err(e),
                Err(e) => {
                    warn!(path = %file.rel, error = %e, "failed to index document");
                    outcome.failed += 1;
                }
            }
        }
        tx.commit()?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn case(name: &str) -> String {
        format!("## Test Case Name\n{name}\n\n## Steps\n1. run\n")
    }

    fn setup() -> (TempDir, IndexStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = IndexStore::open(dir.path().join(".caseindex/cache"), Duration::from_secs(5))
            .expect("store");
        (dir, store)
    }

    #[test]
    fn second_build_skips_unchanged_files() {
        let (dir, store) = setup();
        std::fs::write(dir.path().join("a.md"), case("A")).expect("write");
        std::fs::write(dir.path().join("b.md"), case("B")).expect("write");
        let config = IndexConfig::default();
        let builder = IndexBuilder::new(dir.path(), &config, &store);

        let first = builder.build(None).expect("build");
        assert_eq!(first.parsed(), 2);
        assert_eq!(first.records_written, 2);

        let second = builder.build(None).expect("rebuild");
        assert_eq!(second.parsed(), 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(store.record_count().expect("count"), 2);
    }

    #[test]
    fn progress_reports_each_batch() {
        let (dir, store) = setup();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("{i}.md")), case(&format!("C{i}")))
                .expect("write");
        }
        let config = IndexConfig {
            batch_size: 2,
            ..IndexConfig::default()
        };
        let calls = std::sync::Arc::new(Mutex::new(Vec::new()));
        let progress_calls = std::sync::Arc::clone(&calls);
        let progress = move |done: usize, total: usize| {
            progress_calls.lock().expect("lock").push((done, total));
        };
        IndexBuilder::new(dir.path(), &config, &store)
            .build(Some(&progress))
            .expect("build");
        drop(progress);
        let calls = std::sync::Arc::try_unwrap(calls).expect("sole owner");
        assert_eq!(
            calls.into_inner().expect("lock"),
            vec![(2, 5), (4, 5), (5, 5)]
        );
    }

    #[test]
    fn unreadable_files_do_not_reduce_parsed_count() {
        let report = BuildReport {
            scanned: 3,
            added: 2,
            unreadable: 1,
            records_written: 2,
            ..BuildReport::default()
        };
        assert_eq!(report.parsed(), 2);

        let with_write_failure = BuildReport {
            failed: 1,
            ..report
        };
        assert_eq!(with_write_failure.parsed(), 1);
    }

    #[test]
    fn locked_store_abandons_files_without_failing_build() {
        let dir = TempDir::new().expect("tempdir");
        let store = IndexStore::open(dir.path().join(".caseindex/cache"), Duration::ZERO)
            .expect("store");
        std::fs::write(dir.path().join("a.md"), case("A")).expect("write");
        std::fs::write(dir.path().join("b.md"), case("B")).expect("write");
        let config = IndexConfig {
            update_retries: 2,
            retry_backoff_ms: 1,
            lock_timeout_secs: 0,
            ..IndexConfig::default()
        };
        let builder = IndexBuilder::new(dir.path(), &config, &store);

        let holder = store.connect().expect("connect");
        holder.execute_batch("BEGIN IMMEDIATE").expect("hold write lock");
        let locked = builder.build(None).expect("locked build still completes");
        assert_eq!(locked.added, 2);
        assert_eq!(locked.failed, 2);
        assert_eq!(locked.parsed(), 0);
        holder.execute_batch("ROLLBACK").expect("release");
        drop(holder);

        let retried = builder.build(None).expect("build");
        assert_eq!(retried.parsed(), 2);
        assert_eq!(store.record_count().expect("count"), 2);
    }

    #[test]
    fn build_records_last_index_time() {
        let (dir, store) = setup();
        let config = IndexConfig::default();
        IndexBuilder::new(dir.path(), &config, &store)
            .build(None)
            .expect("build");
        assert!(store
            .get_state(LAST_INDEX_TIME_KEY)
            .expect("state")
            .is_some());
    }

    #[test]
    fn prepared_fingerprint_matches_parsed_bytes() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("a.md");
        let content = case("Fingerprint");
        std::fs::write(&path, &content).expect("write");
        let prepared = prepare_file("a.md", &path).expect("prepare");
        assert_eq!(prepared.fingerprint.content_hash, hash_bytes(content.as_bytes()));
        assert_eq!(prepared.records.len(), 1);
        assert_eq!(prepared.records[0].file_path, "a.md");
    }
}
