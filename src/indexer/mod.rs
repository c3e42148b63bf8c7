// SPDX-License-Identifier: MIT OR Apache-2.0

//! Indexer module - scanning, change detection, storage, builds and watching

pub mod build;
pub mod changes;
mod retry;
pub mod scanner;
pub mod store;
pub(crate) mod update;
pub mod watch;

pub use build::{BuildReport, IndexBuilder, ProgressFn};
pub use changes::{compute_changes, ChangeSet};
pub use scanner::FileScanner;
pub use store::{FileFingerprint, FileMetadata, IndexStore};
pub use watch::{ChangeSink, Debouncer, WatchEvent, WatchEventKind, WatchOptions, Watcher, WatcherState};
