// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-file updates shared by the manager and the watcher

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, warn};

use crate::config::IndexConfig;
use crate::errors::Result;
use crate::indexer::build::{prepare_file, BuildReport, IndexBuilder, ProgressFn};
use crate::indexer::retry::with_lock_retry;
use crate::indexer::scanner::{relative_path, FileScanner};
use crate::indexer::store::{replace_file_records, IndexStore};
use crate::indexer::watch::ChangeSink;

/// Everything needed to write to one project's index.
///
/// Cheap to clone; clones share the build gate. Builds and rebuilds hold it
/// exclusively, single-file writes hold it shared, so the database is never
/// deleted under an in-flight update.
#[derive(Debug, Clone)]
pub(crate) struct FileUpdater {
    root: PathBuf,
    config: IndexConfig,
    store: IndexStore,
    gate: Arc<RwLock<()>>,
}

impl FileUpdater {
    pub fn new(root: PathBuf, config: IndexConfig, store: IndexStore) -> Self {
        Self {
            root,
            config,
            store,
            gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn scanner(&self) -> FileScanner {
        FileScanner::from_config(&self.root, &self.config)
    }

    fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Incremental build.
    pub fn build(&self, progress: Option<&ProgressFn>) -> Result<BuildReport> {
        let _gate = self.exclusive();
        IndexBuilder::new(&self.root, &self.config, &self.store).build(progress)
    }

    /// Drop the full-text database and index every document again.
    pub fn rebuild(&self, progress: Option<&ProgressFn>) -> Result<BuildReport> {
        let _gate = self.exclusive();
        self.store.recreate()?;
        IndexBuilder::new(&self.root, &self.config, &self.store).build(progress)
    }

    /// Re-parse one document and replace its rows. Returns the number of
    /// records written, or `None` when the path is not an indexed document.
    pub fn update_file(&self, abs: &Path) -> Result<Option<usize>> {
        let resolved = abs.canonicalize().unwrap_or_else(|_| abs.to_path_buf());
        let abs = resolved.as_path();
        let Some(rel) = relative_path(&self.root, abs) else {
            debug!(path = %abs.display(), "ignoring path outside project root");
            return Ok(None);
        };
        if !abs.is_file() {
            self.remove_file(abs)?;
            return Ok(None);
        }
        if !self.scanner().accepts(abs) {
            debug!(path = %rel, "ignoring non-document path");
            return Ok(None);
        }

        let result = {
            let _gate = self.shared();
            with_lock_retry(&self.config, &rel, || {
                let prepared = prepare_file(&rel, abs)?;
                let mut conn = self.store.connect()?;
                let tx = conn.transaction()?;
                replace_file_records(&tx, &prepared.rel, &prepared.records, &prepared.fingerprint)?;
                tx.commit()?;
                Ok(prepared.records.len())
            })
        };

        match result {
            Ok(records) => {
                debug!(path = %rel, records, "document re-indexed");
                Ok(Some(records))
            }
            Err(e) if e.is_corruption() => {
                error!(path = %rel, error = %e, "index corrupted, rebuilding");
                self.rebuild(None)?;
                Ok(Some(0))
            }
            Err(e) => {
                if e.is_locked() {
                    warn!(path = %rel, error = %e, "abandoning update after retries");
                }
                Err(e)
            }
        }
    }

    /// Drop every record of one document.
    pub fn remove_file(&self, abs: &Path) -> Result<()> {
        let Some(rel) = relative_path(&self.root, abs) else {
            return Ok(());
        };
        {
            let _gate = self.shared();
            with_lock_retry(&self.config, &rel, || self.store.remove_file(&rel))?;
        }
        debug!(path = %rel, "document removed from index");
        Ok(())
    }
}

impl ChangeSink for FileUpdater {
    fn update_file(&self, path: &Path) -> Result<()> {
        FileUpdater::update_file(self, path).map(|_| ())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        FileUpdater::remove_file(self, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CACHE_DIR, INDEX_DIR};
    use std::time::Duration;
    use tempfile::TempDir;

    fn updater(dir: &TempDir) -> FileUpdater {
        let root = dir.path().canonicalize().expect("canonical root");
        let store = IndexStore::open(root.join(INDEX_DIR).join(CACHE_DIR), Duration::from_secs(5))
            .expect("store");
        FileUpdater::new(root, IndexConfig::default(), store)
    }

    #[test]
    fn update_replaces_rows_of_one_file() {
        let dir = TempDir::new().expect("tempdir");
        let updater = updater(&dir);
        let path = updater.root().join("a.md");

        std::fs::write(&path, "## Test Case Name\nOld\n").expect("write");
        assert_eq!(updater.update_file(&path).expect("update"), Some(1));
        std::fs::write(&path, "## Test Case Name\nNew\n\n## Test Case Name\nMore\n")
            .expect("write");
        assert_eq!(updater.update_file(&path).expect("update"), Some(2));

        let names: Vec<String> = updater
            .store()
            .all_records()
            .expect("records")
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["More".to_string(), "New".to_string()]);
    }

    #[test]
    fn missing_file_is_removed() {
        let dir = TempDir::new().expect("tempdir");
        let updater = updater(&dir);
        let path = updater.root().join("a.md");
        std::fs::write(&path, "## Test Case Name\nGone soon\n").expect("write");
        updater.update_file(&path).expect("update");
        std::fs::remove_file(&path).expect("remove");

        assert_eq!(updater.update_file(&path).expect("update"), None);
        assert_eq!(updater.store().record_count().expect("count"), 0);
        assert_eq!(updater.store().tracked_file_count().expect("tracked"), 0);
    }

    #[test]
    fn rebuild_waits_for_in_flight_writes() {
        let dir = TempDir::new().expect("tempdir");
        let updater = updater(&dir);
        let path = updater.root().join("a.md");
        std::fs::write(&path, "## Test Case Name\nKept\n").expect("write");
        updater.update_file(&path).expect("update");

        let writer = updater.shared();
        let rebuilder = updater.clone();
        let handle = std::thread::spawn(move || rebuilder.rebuild(None));
        std::thread::sleep(Duration::from_millis(200));
        assert!(!handle.is_finished());
        assert!(updater.store().fts_path().exists());

        drop(writer);
        let report = handle.join().expect("join").expect("rebuild");
        assert_eq!(report.parsed(), 1);
        assert_eq!(updater.store().record_count().expect("count"), 1);
    }

    #[test]
    fn non_documents_are_ignored() {
        let dir = TempDir::new().expect("tempdir");
        let updater = updater(&dir);
        let path = updater.root().join("notes.txt");
        std::fs::write(&path, "## Test Case Name\nNot indexed\n").expect("write");
        assert_eq!(updater.update_file(&path).expect("update"), None);
        assert_eq!(
            updater
                .update_file(Path::new("/elsewhere/a.md"))
                .expect("update"),
            None
        );
        assert_eq!(updater.store().record_count().expect("count"), 0);
    }
}
