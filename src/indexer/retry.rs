// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded retry for SQLite lock contention

use std::thread;
use tracing::warn;

use crate::config::IndexConfig;
use crate::errors::Result;

/// Run `op`, retrying busy/locked failures with exponential backoff.
///
/// Any other error, or the last locked error once `update_retries` attempts
/// are used up, is returned unchanged.
pub(crate) fn with_lock_retry<T>(
    config: &IndexConfig,
    what: &str,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut delay = config.retry_backoff();
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_locked() && attempt < config.update_retries => {
                warn!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "index locked, retrying"
                );
                thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::IndexError;
    use rusqlite::ffi;

    fn locked() -> IndexError {
        IndexError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        ))
    }

    fn fast_config() -> IndexConfig {
        IndexConfig {
            retry_backoff_ms: 1,
            ..IndexConfig::default()
        }
    }

    #[test]
    fn recovers_after_transient_locks() {
        let mut calls = 0;
        let value = with_lock_retry(&fast_config(), "test", || {
            calls += 1;
            if calls < 3 {
                Err(locked())
            } else {
                Ok(calls)
            }
        })
        .expect("third attempt succeeds");
        assert_eq!(value, 3);
    }

    #[test]
    fn gives_up_after_configured_attempts() {
        let mut calls = 0;
        let result: Result<()> = with_lock_retry(&fast_config(), "test", || {
            calls += 1;
            Err(locked())
        });
        assert!(result.expect_err("still locked").is_locked());
        assert_eq!(calls, 3);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<()> = with_lock_retry(&fast_config(), "test", || {
            calls += 1;
            Err(IndexError::Config("bad".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
