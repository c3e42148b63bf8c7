// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite index storage
//!
//! Two databases live under `<root>/.caseindex/cache/`:
//! - `testcases_fts.db`: FTS5 trigram table with one row per record, plus
//!   `testcases_meta` with one row per indexed source file
//! - `metadata.db`: project-level key/value state
//!
//! Every operation opens its own short-lived connection. WAL keeps readers
//! from blocking on the writer and the busy timeout serializes writers.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::errors::{IndexError, Result};
use crate::parser::{record_id, TestCaseRecord};
use crate::query::search::FieldSnippets;
use crate::query::snippet::{ELLIPSIS, MARK_CLOSE, MARK_OPEN};
use crate::query::terms::{like_pattern, QueryPlan};

pub const FTS_DB_FILE: &str = "testcases_fts.db";
pub const STATE_DB_FILE: &str = "metadata.db";

/// Project state key holding the Unix-ms time of the last successful build.
pub const LAST_INDEX_TIME_KEY: &str = "last_index_time";

const RECORD_COLUMNS: &str =
    "id, name, number, preconditions, steps, expected_results, notes, file_path";
const SEARCHABLE_COLUMNS: &[&str] = &[
    "name",
    "number",
    "preconditions",
    "steps",
    "expected_results",
    "notes",
];

/// File state at the time it was last parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    /// Modification time, nanoseconds since the Unix epoch
    pub mtime: i64,
    pub content_hash: String,
}

/// One `testcases_meta` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    pub file_path: String,
    pub mtime: i64,
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
    /// Id of one contained record, used only as a change-tracking anchor
    pub sample_id: String,
}

impl FileMetadata {
    pub fn fingerprint(&self) -> FileFingerprint {
        FileFingerprint {
            mtime: self.mtime,
            content_hash: self.content_hash.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexStore {
    cache_dir: PathBuf,
    lock_timeout: Duration,
}

impl IndexStore {
    /// Open (creating if needed) the store under `cache_dir`.
    pub fn open(cache_dir: impl Into<PathBuf>, lock_timeout: Duration) -> Result<Self> {
        let store = Self {
            cache_dir: cache_dir.into(),
            lock_timeout,
        };
        std::fs::create_dir_all(&store.cache_dir)
            .map_err(|e| IndexError::io(&store.cache_dir, e))?;
        store.init_schema()?;
        Ok(store)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn fts_path(&self) -> PathBuf {
        self.cache_dir.join(FTS_DB_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.cache_dir.join(STATE_DB_FILE)
    }

    fn configure(&self, conn: &Connection) -> Result<()> {
        conn.busy_timeout(self.lock_timeout)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous=NORMAL; PRAGMA temp_store=MEMORY;")?;
        Ok(())
    }

    /// Fresh connection to the full-text database.
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(self.fts_path())?;
        self.configure(&conn)?;
        Ok(conn)
    }

    fn connect_state(&self) -> Result<Connection> {
        let conn = Connection::open(self.state_path())?;
        self.configure(&conn)?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS testcases_fts USING fts5(
                id UNINDEXED,
                name,
                number,
                preconditions,
                steps,
                expected_results,
                notes,
                file_path UNINDEXED,
                tokenize = 'trigram'
            );
            CREATE TABLE IF NOT EXISTS testcases_meta (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sample_id TEXT NOT NULL,
                file_path TEXT NOT NULL UNIQUE,
                mtime INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;

        let state = self.connect_state()?;
        state.execute_batch(
            "CREATE TABLE IF NOT EXISTS project_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Delete the full-text database with its WAL/SHM side files.
    /// Project state is kept.
    pub fn destroy(&self) -> Result<()> {
        let db_path = self.fts_path();
        for path in [
            db_path.clone(),
            db_path.with_extension("db-wal"),
            db_path.with_extension("db-shm"),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(IndexError::io(path, e)),
            }
        }
        info!(path = %db_path.display(), "index database removed");
        Ok(())
    }

    /// [`destroy`](Self::destroy) followed by an empty schema.
    pub fn recreate(&self) -> Result<()> {
        self.destroy()?;
        self.init_schema()
    }

    pub fn load_metadata(&self) -> Result<HashMap<String, FileMetadata>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT file_path, mtime, content_hash, created_at, updated_at, sample_id
             FROM testcases_meta",
        )?;
        let rows = stmt.query_map([], metadata_from_row)?;
        let mut map = HashMap::new();
        for row in rows {
            let meta = row?;
            map.insert(meta.file_path.clone(), meta);
        }
        Ok(map)
    }

    pub fn file_metadata(&self, file_path: &str) -> Result<Option<FileMetadata>> {
        let conn = self.connect()?;
        let meta = conn
            .query_row(
                "SELECT file_path, mtime, content_hash, created_at, updated_at, sample_id
                 FROM testcases_meta WHERE file_path = ?1",
                params![file_path],
                metadata_from_row,
            )
            .optional()?;
        Ok(meta)
    }

    /// Remove every record and the metadata row of one file.
    pub fn remove_file(&self, file_path: &str) -> Result<()> {
        self.remove_files(&[file_path.to_string()])?;
        Ok(())
    }

    /// Remove several files in one transaction. Returns the records deleted.
    pub fn remove_files(&self, file_paths: &[String]) -> Result<usize> {
        if file_paths.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        for file_path in file_paths {
            removed += delete_file_rows(&tx, file_path)?;
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Term-matched search with highlighted snippets, best rank first.
    pub fn full_text_search(
        &self,
        plan: &QueryPlan,
    ) -> Result<Vec<(TestCaseRecord, FieldSnippets)>> {
        let conn = self.connect()?;
        let snippet = |column: usize, tokens: usize| {
            format!(
                "snippet(testcases_fts, {column}, '{MARK_OPEN}', '{MARK_CLOSE}', '{ELLIPSIS}', {tokens})"
            )
        };
        let sql = format!(
            "SELECT {RECORD_COLUMNS}, {}, {}, {}, {}, {}, {}
             FROM testcases_fts
             WHERE testcases_fts MATCH ?1
             ORDER BY rank",
            snippet(1, 32),
            snippet(2, 32),
            snippet(3, 64),
            snippet(4, 64),
            snippet(5, 64),
            snippet(6, 64),
        );
        let expression = plan.fts_expression();
        debug!(expression = %expression, "full-text query");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![expression], |row| {
            let record = record_from_row(row)?;
            let snippets = FieldSnippets {
                name: row.get(8)?,
                number: row.get(9)?,
                preconditions: row.get(10)?,
                steps: row.get(11)?,
                expected_results: row.get(12)?,
                notes: row.get(13)?,
            };
            Ok((record, snippets))
        })?;
        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }

    /// LIKE scan over all text columns, AND across keywords and OR across
    /// each keyword's expansions. Ordered by name.
    pub fn substring_search(&self, plan: &QueryPlan) -> Result<Vec<TestCaseRecord>> {
        let column_match = SEARCHABLE_COLUMNS
            .iter()
            .map(|column| format!("{column} LIKE ? ESCAPE '\\'"))
            .collect::<Vec<_>>()
            .join(" OR ");

        let mut params: Vec<String> = Vec::new();
        let mut groups: Vec<String> = Vec::new();
        for keyword in &plan.keywords {
            let mut alternatives: Vec<String> = Vec::new();
            for term in &keyword.terms {
                let pattern = like_pattern(term);
                params.extend(std::iter::repeat(pattern).take(SEARCHABLE_COLUMNS.len()));
                alternatives.push(format!("({column_match})"));
            }
            groups.push(format!("({})", alternatives.join(" OR ")));
        }

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM testcases_fts WHERE {} ORDER BY name",
            groups.join(" AND ")
        );
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), record_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Every record, ordered by name.
    pub fn all_records(&self) -> Result<Vec<TestCaseRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM testcases_fts ORDER BY name"
        ))?;
        let rows = stmt.query_map([], record_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn record_count(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM testcases_fts")
    }

    /// Files contributing at least one record.
    pub fn file_count(&self) -> Result<usize> {
        self.count("SELECT COUNT(DISTINCT file_path) FROM testcases_fts")
    }

    /// Files with a metadata row, including zero-record files.
    pub fn tracked_file_count(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM testcases_meta")
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connect_state()?;
        let value = conn
            .query_row(
                "SELECT value FROM project_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connect_state()?;
        conn.execute(
            "INSERT INTO project_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

/// Replace every row belonging to `file_path` with `records` and upsert its
/// metadata. Callers run this inside a transaction or savepoint.
pub(crate) fn replace_file_records(
    conn: &Connection,
    file_path: &str,
    records: &[TestCaseRecord],
    fingerprint: &FileFingerprint,
) -> Result<()> {
    conn.execute(
        "DELETE FROM testcases_fts WHERE file_path = ?1",
        params![file_path],
    )?;

    {
        let mut insert = conn.prepare_cached(
            "INSERT INTO testcases_fts
                (id, name, number, preconditions, steps, expected_results, notes, file_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for record in records {
            insert.execute(params![
                record.id,
                record.name,
                record.number,
                record.preconditions,
                record.steps,
                record.expected_results,
                record.notes,
                file_path,
            ])?;
        }
    }

    let sample_id = records
        .first()
        .map(|record| record.id.clone())
        .unwrap_or_else(|| record_id(file_path, ""));
    let now = now_unix_ms();
    conn.execute(
        "INSERT INTO testcases_meta
            (sample_id, file_path, mtime, content_hash, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(file_path) DO UPDATE SET
            sample_id = excluded.sample_id,
            mtime = excluded.mtime,
            content_hash = excluded.content_hash,
            updated_at = excluded.updated_at",
        params![
            sample_id,
            file_path,
            fingerprint.mtime,
            fingerprint.content_hash,
            now
        ],
    )?;
    Ok(())
}

/// Delete records and metadata of one file. Returns the records deleted.
pub(crate) fn delete_file_rows(conn: &Connection, file_path: &str) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM testcases_fts WHERE file_path = ?1",
        params![file_path],
    )?;
    conn.execute(
        "DELETE FROM testcases_meta WHERE file_path = ?1",
        params![file_path],
    )?;
    Ok(removed)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TestCaseRecord> {
    Ok(TestCaseRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        number: row.get(2)?,
        preconditions: row.get(3)?,
        steps: row.get(4)?,
        expected_results: row.get(5)?,
        notes: row.get(6)?,
        file_path: row.get(7)?,
    })
}

fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<FileMetadata> {
    Ok(FileMetadata {
        file_path: row.get(0)?,
        mtime: row.get(1)?,
        content_hash: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        sample_id: row.get(5)?,
    })
}

pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
