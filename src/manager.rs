// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index manager - the entry point used by the CLI and by editors
//!
//! Owns one project's index: builds, searches, statistics and the optional
//! background watcher.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::config::{IndexConfig, CACHE_DIR, INDEX_DIR};
use crate::errors::{IndexError, Result};
use crate::indexer::build::{BuildReport, ProgressFn};
use crate::indexer::store::{IndexStore, LAST_INDEX_TIME_KEY};
use crate::indexer::update::FileUpdater;
use crate::indexer::watch::{WatchOptions, Watcher, WatcherState};
use crate::parser::TestCaseRecord;
use crate::query::search::{SearchEngine, SearchHit};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatistics {
    pub record_count: usize,
    /// Files contributing at least one record
    pub file_count: usize,
    /// Files with stored metadata, zero-record files included
    pub tracked_files: usize,
    /// Unix ms of the last completed build
    pub last_index_time: Option<i64>,
    pub is_first_open: bool,
}

pub struct IndexManager {
    updater: FileUpdater,
    watcher: Mutex<Option<Watcher>>,
}

impl IndexManager {
    /// Open the index of `root`, loading `.caseindexrc.toml` if present.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let config = IndexConfig::load(root.as_ref());
        Self::with_config(root, config)
    }

    pub fn with_config(root: impl AsRef<Path>, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(IndexError::InvalidRoot(root.to_path_buf()));
        }
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let store = IndexStore::open(root.join(INDEX_DIR).join(CACHE_DIR), config.lock_timeout())?;
        Ok(Self {
            updater: FileUpdater::new(root, config, store),
            watcher: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        self.updater.root()
    }

    pub fn config(&self) -> &IndexConfig {
        self.updater.config()
    }

    fn store(&self) -> &IndexStore {
        self.updater.store()
    }

    /// Index new and modified documents, drop deleted ones. Returns the
    /// number of documents parsed.
    pub fn build_index(&self, force_rebuild: bool) -> Result<usize> {
        self.build_index_with_progress(force_rebuild, None)
            .map(|report| report.parsed())
    }

    pub fn build_index_with_progress(
        &self,
        force_rebuild: bool,
        progress: Option<&ProgressFn>,
    ) -> Result<BuildReport> {
        if force_rebuild {
            return self.rebuild_from_scratch(progress);
        }
        match self.updater.build(progress) {
            Err(e) if e.is_corruption() => {
                warn!(error = %e, "index corrupted, rebuilding from scratch");
                self.rebuild_from_scratch(progress)
            }
            other => other,
        }
    }

    /// Stop the watcher, recreate the store, build, then resume watching.
    fn rebuild_from_scratch(&self, progress: Option<&ProgressFn>) -> Result<BuildReport> {
        let was_watching = self.take_watcher();
        let result = self.updater.rebuild(progress);
        if was_watching {
            if let Err(e) = self.start_watching() {
                warn!(error = %e, "failed to restart watcher after rebuild");
            }
        }
        result
    }

    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        self.search_with_limit(query, None)
    }

    /// Search with an optional result cap. A corrupted full-text index is
    /// rebuilt once and the query re-run against the fresh index.
    pub fn search_with_limit(&self, query: &str, limit: Option<usize>) -> Vec<SearchHit> {
        let results = self.engine().run(query, limit);
        if !results.index_corrupted {
            return results.hits;
        }
        warn!("full-text index corrupted, rebuilding from scratch");
        match self.rebuild_from_scratch(None) {
            Ok(_) => self.engine().search(query, limit),
            Err(e) => {
                warn!(error = %e, "rebuild after corruption failed");
                results.hits
            }
        }
    }

    fn engine(&self) -> SearchEngine<'_> {
        SearchEngine::new(self.store(), self.config().fallback_threshold)
    }

    /// Every indexed record, ordered by name.
    pub fn get_all_records(&self) -> Result<Vec<TestCaseRecord>> {
        self.store().all_records()
    }

    pub fn get_statistics(&self) -> Result<IndexStatistics> {
        let store = self.store();
        let last_index_time = store
            .get_state(LAST_INDEX_TIME_KEY)?
            .and_then(|value| value.parse::<i64>().ok());
        Ok(IndexStatistics {
            record_count: store.record_count()?,
            file_count: store.file_count()?,
            tracked_files: store.tracked_file_count()?,
            last_index_time,
            is_first_open: last_index_time.is_none(),
        })
    }

    /// True until the first build of this project completes.
    pub fn is_first_open(&self) -> Result<bool> {
        Ok(self.store().get_state(LAST_INDEX_TIME_KEY)?.is_none())
    }

    fn lock_watcher(&self) -> MutexGuard<'_, Option<Watcher>> {
        self.watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the background watcher. No-op when already running.
    pub fn start_watching(&self) -> Result<()> {
        let mut slot = self.lock_watcher();
        if slot.is_some() {
            return Ok(());
        }
        let watcher = Watcher::start(
            self.updater.scanner(),
            Arc::new(self.updater.clone()),
            WatchOptions::from_config(self.config()),
        )?;
        info!(root = %self.root().display(), "watching for changes");
        *slot = Some(watcher);
        Ok(())
    }

    /// Stop the watcher and wait for it to exit.
    pub fn stop_watching(&self) {
        self.take_watcher();
    }

    /// Stop and drop the watcher. Returns whether one was running.
    fn take_watcher(&self) -> bool {
        let taken = self.lock_watcher().take();
        match taken {
            Some(mut watcher) => {
                watcher.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.lock_watcher().is_some()
    }

    /// Current watcher state, `Stopped` when no watcher is running.
    pub fn watcher_state(&self) -> WatcherState {
        self.lock_watcher()
            .as_ref()
            .map(Watcher::state)
            .unwrap_or(WatcherState::Stopped)
    }

    /// Absolute path of the document a record came from.
    pub fn absolute_path(&self, record: &TestCaseRecord) -> PathBuf {
        self.root().join(&record.file_path)
    }

    /// Re-index a single document, e.g. right after an editor saves it.
    /// Returns the records written, `None` for paths that are not documents.
    pub fn update_file(&self, path: &Path) -> Result<Option<usize>> {
        self.updater.update_file(path)
    }

    pub fn remove_file(&self, path: &Path) -> Result<()> {
        self.updater.remove_file(path)
    }
}

impl Drop for IndexManager {
    fn drop(&mut self) {
        self.stop_watching();
    }
}
