// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change detection against stored file metadata

use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::indexer::scanner::{file_mtime_nanos, relative_path};
use crate::indexer::store::{FileFingerprint, FileMetadata};

/// A document whose records must be (re)written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub rel: String,
    pub abs: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added: Vec<ChangedFile>,
    pub modified: Vec<ChangedFile>,
    /// Stored paths no longer present on disk
    pub deleted: Vec<String>,
    pub unchanged: usize,
    /// Present on disk but unreadable; their stored rows are left alone
    pub unreadable: usize,
}

impl ChangeSet {
    /// Added then modified files, each group sorted by path.
    pub fn changed(&self) -> Vec<ChangedFile> {
        self.added.iter().chain(&self.modified).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Classify `files` against the stored metadata.
///
/// A file is unchanged only when both its mtime and content hash match what
/// was recorded; hashing runs in parallel.
pub fn compute_changes(
    root: &Path,
    files: &[PathBuf],
    stored: &HashMap<String, FileMetadata>,
) -> ChangeSet {
    let fingerprints: Vec<(String, PathBuf, Option<FileFingerprint>)> = files
        .par_iter()
        .filter_map(|abs| {
            let rel = relative_path(root, abs)?;
            let fingerprint = match fingerprint_file(abs) {
                Ok(fingerprint) => Some(fingerprint),
                Err(e) => {
                    warn!(path = %abs.display(), error = %e, "failed to fingerprint file");
                    None
                }
            };
            Some((rel, abs.clone(), fingerprint))
        })
        .collect();

    let mut changes = ChangeSet::default();
    let mut seen: HashSet<&str> = HashSet::with_capacity(fingerprints.len());

    for (rel, abs, fingerprint) in &fingerprints {
        seen.insert(rel.as_str());
        let Some(fingerprint) = fingerprint else {
            changes.unreadable += 1;
            continue;
        };
        let changed = ChangedFile {
            rel: rel.clone(),
            abs: abs.clone(),
        };
        match stored.get(rel) {
            None => changes.added.push(changed),
            Some(existing) if existing.fingerprint() == *fingerprint => changes.unchanged += 1,
            Some(_) => changes.modified.push(changed),
        }
    }

    changes.deleted = stored
        .keys()
        .filter(|rel| !seen.contains(rel.as_str()))
        .cloned()
        .collect();

    changes.added.sort_by(|a, b| a.rel.cmp(&b.rel));
    changes.modified.sort_by(|a, b| a.rel.cmp(&b.rel));
    changes.deleted.sort();
    changes
}

pub fn fingerprint_file(path: &Path) -> std::io::Result<FileFingerprint> {
    let metadata = std::fs::metadata(path)?;
    Ok(FileFingerprint {
        mtime: file_mtime_nanos(&metadata),
        content_hash: hash_file_streaming(path)?,
    })
}

fn hash_file_streaming(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// blake3 hex digest of an in-memory document.
pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stored_entry(rel: &str, fingerprint: &FileFingerprint) -> FileMetadata {
        FileMetadata {
            file_path: rel.to_string(),
            mtime: fingerprint.mtime,
            content_hash: fingerprint.content_hash.clone(),
            created_at: 0,
            updated_at: 0,
            sample_id: String::new(),
        }
    }

    #[test]
    fn classifies_added_modified_deleted_unchanged() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        let same = root.join("same.md");
        let edited = root.join("edited.md");
        let fresh = root.join("fresh.md");
        std::fs::write(&same, "same").expect("write");
        std::fs::write(&edited, "before").expect("write");
        std::fs::write(&fresh, "fresh").expect("write");

        let mut stored = HashMap::new();
        stored.insert(
            "same.md".to_string(),
            stored_entry("same.md", &fingerprint_file(&same).expect("fp")),
        );
        let mut old = fingerprint_file(&edited).expect("fp");
        old.content_hash = hash_bytes(b"before edit");
        stored.insert("edited.md".to_string(), stored_entry("edited.md", &old));
        stored.insert(
            "gone.md".to_string(),
            stored_entry("gone.md", &fingerprint_file(&same).expect("fp")),
        );

        let files = vec![edited.clone(), fresh.clone(), same.clone()];
        let changes = compute_changes(root, &files, &stored);

        assert_eq!(changes.unchanged, 1);
        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.added[0].rel, "fresh.md");
        assert_eq!(changes.modified.len(), 1);
        assert_eq!(changes.modified[0].rel, "edited.md");
        assert_eq!(changes.deleted, vec!["gone.md".to_string()]);
        assert!(!changes.is_empty());
    }

    #[test]
    fn mtime_change_alone_is_a_modification() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("a.md");
        std::fs::write(&path, "body").expect("write");
        let mut fingerprint = fingerprint_file(&path).expect("fp");
        fingerprint.mtime -= 1;

        let mut stored = HashMap::new();
        stored.insert("a.md".to_string(), stored_entry("a.md", &fingerprint));
        let changes = compute_changes(dir.path(), &[path], &stored);
        assert_eq!(changes.modified.len(), 1);
    }

    #[test]
    fn streaming_hash_matches_in_memory_hash() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("a.md");
        std::fs::write(&path, "hash me").expect("write");
        assert_eq!(
            fingerprint_file(&path).expect("fp").content_hash,
            hash_bytes(b"hash me")
        );
    }
}
