// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for index, store and watcher operations

use std::path::PathBuf;
use thiserror::Error;

/// Substrings of SQLite error messages that mean the full-text table can no
/// longer be trusted and must be rebuilt from source files.
const CORRUPTION_SIGNATURES: &[&str] = &[
    "recursively defined fts5",
    "database disk image is malformed",
];

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error(
        "Project root '{}' is not a directory\n\n\
         Suggestion: pass an existing project directory with --root",
        .0.display()
    )]
    InvalidRoot(PathBuf),
}

impl IndexError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the error is SQLite lock contention (busy/locked).
    pub fn is_locked(&self) -> bool {
        match self {
            Self::Sqlite(err) => sqlite_is_locked(err),
            _ => false,
        }
    }

    /// True when the error carries a known full-text corruption signature.
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Sqlite(err) => sqlite_is_corruption(err),
            _ => false,
        }
    }
}

pub(crate) fn sqlite_is_locked(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;

    if matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    ) {
        return true;
    }
    let message = err.to_string().to_lowercase();
    message.contains("database is locked") || message.contains("database is busy")
}

pub(crate) fn sqlite_is_corruption(err: &rusqlite::Error) -> bool {
    let message = err.to_string().to_lowercase();
    CORRUPTION_SIGNATURES
        .iter()
        .any(|signature| message.contains(signature))
}

pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn sqlite_failure(code: std::os::raw::c_int, message: &str) -> IndexError {
        IndexError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(code),
            Some(message.to_string()),
        ))
    }

    #[test]
    fn busy_errors_are_locked() {
        let err = sqlite_failure(ffi::SQLITE_BUSY, "database is locked");
        assert!(err.is_locked());
        assert!(!err.is_corruption());
    }

    #[test]
    fn fts_recursion_is_corruption() {
        let err = sqlite_failure(
            ffi::SQLITE_ERROR,
            "SQL logic error: recursively defined fts5 content table",
        );
        assert!(err.is_corruption());
        assert!(!err.is_locked());
    }

    #[test]
    fn io_errors_are_neither() {
        let err = IndexError::io(
            "a.md",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(!err.is_locked());
        assert!(!err.is_corruption());
        assert!(err.to_string().contains("a.md"));
    }
}
