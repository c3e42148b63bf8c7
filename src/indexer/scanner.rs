// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document scanner using the ignore crate (same as ripgrep)

use ignore::WalkBuilder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::UNIX_EPOCH;

use crate::config::{IndexConfig, INDEX_DIR};

/// Directory names never descended into, on top of hidden directories.
const RESERVED_DIRS: &[&str] = &[
    INDEX_DIR,
    ".git",
    ".hg",
    ".svn",
    "__pycache__",
    "node_modules",
    ".vscode",
    ".idea",
    "build",
    "dist",
];

/// Finds test-case documents below a project root
#[derive(Debug, Clone)]
pub struct FileScanner {
    root: PathBuf,
    extension: String,
    exclude_dirs: Vec<String>,
    respect_git_ignore: bool,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>, extension: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
            exclude_dirs: Vec::new(),
            respect_git_ignore: false,
        }
    }

    pub fn from_config(root: impl AsRef<Path>, config: &IndexConfig) -> Self {
        Self::new(root, &config.normalized_extension())
            .with_excludes(config.exclude_dirs.clone())
            .with_gitignore(config.respect_gitignore)
    }

    /// Skip directories with these names in addition to the reserved set
    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.exclude_dirs = excludes;
        self
    }

    /// Enable or disable respect for git ignore rules
    pub fn with_gitignore(mut self, enabled: bool) -> Self {
        self.respect_git_ignore = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn make_builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(false)
            .ignore(false)
            .parents(self.respect_git_ignore)
            .git_ignore(self.respect_git_ignore)
            .git_exclude(self.respect_git_ignore)
            .git_global(self.respect_git_ignore);
        builder
    }

    /// All matching documents, sorted by path.
    pub fn list_files(&self) -> Vec<PathBuf> {
        let (tx, rx) = mpsc::channel();

        let exclude_dirs = self.exclude_dirs.clone();
        let walker = self
            .make_builder()
            .filter_entry(move |entry| {
                if entry.depth() == 0 || !entry.file_type().is_some_and(|t| t.is_dir()) {
                    return true;
                }
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !is_skipped_dir(name, &exclude_dirs))
                    .unwrap_or(true)
            })
            .build_parallel();

        let extension = self.extension.clone();
        walker.run(|| {
            let tx = tx.clone();
            let extension = extension.clone();

            Box::new(move |entry| {
                if let Ok(entry) = entry {
                    let path = entry.path();
                    if entry.file_type().is_some_and(|t| t.is_file())
                        && has_extension(path, &extension)
                    {
                        let _ = tx.send(path.to_path_buf());
                    }
                }
                ignore::WalkState::Continue
            })
        });

        drop(tx);
        let mut files: Vec<PathBuf> = rx.into_iter().collect();
        files.sort();
        files
    }

    /// Modification time (ns) of every matching document.
    pub fn snapshot(&self) -> HashMap<PathBuf, i64> {
        self.list_files()
            .into_iter()
            .filter_map(|path| {
                let metadata = std::fs::metadata(&path).ok()?;
                Some((path, file_mtime_nanos(&metadata)))
            })
            .collect()
    }

    /// True when `path` would be picked up by [`list_files`](Self::list_files).
    pub fn accepts(&self, path: &Path) -> bool {
        if !has_extension(path, &self.extension) {
            return false;
        }
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return false;
        };
        let mut dirs = rel.components().collect::<Vec<_>>();
        dirs.pop();
        dirs.iter().all(|component| {
            component
                .as_os_str()
                .to_str()
                .map(|name| !is_skipped_dir(name, &self.exclude_dirs))
                .unwrap_or(true)
        })
    }
}

fn is_skipped_dir(name: &str, exclude_dirs: &[String]) -> bool {
    name.starts_with('.')
        || RESERVED_DIRS.contains(&name)
        || exclude_dirs.iter().any(|excluded| excluded == name)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Project-relative, `/`-separated form of `abs`.
pub fn relative_path(root: &Path, abs: &Path) -> Option<String> {
    let rel = abs.strip_prefix(root).ok()?;
    let path = rel.to_string_lossy().replace('\\', "/");
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

pub fn file_mtime_nanos(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, "x").expect("write");
    }

    #[test]
    fn skips_reserved_hidden_and_excluded_dirs() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        touch(root, "a.md");
        touch(root, "cases/b.MD");
        touch(root, "cases/notes.txt");
        touch(root, ".caseindex/cache/c.md");
        touch(root, ".hidden/d.md");
        touch(root, "node_modules/e.md");
        touch(root, "build/f.md");
        touch(root, "drafts/g.md");

        let scanner = FileScanner::new(root, "md").with_excludes(vec!["drafts".into()]);
        let rels: Vec<String> = scanner
            .list_files()
            .iter()
            .filter_map(|p| relative_path(root, p))
            .collect();
        assert_eq!(rels, vec!["a.md".to_string(), "cases/b.MD".to_string()]);
    }

    #[test]
    fn hidden_root_is_still_walked() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().join(".project");
        touch(&root, "a.md");
        assert_eq!(FileScanner::new(&root, "md").list_files().len(), 1);
    }

    #[test]
    fn accepts_mirrors_walk_rules() {
        let root = Path::new("/proj");
        let scanner = FileScanner::new(root, ".md");
        assert!(scanner.accepts(Path::new("/proj/cases/a.md")));
        assert!(!scanner.accepts(Path::new("/proj/.git/a.md")));
        assert!(!scanner.accepts(Path::new("/proj/a.txt")));
        assert!(!scanner.accepts(Path::new("/other/a.md")));
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let root = Path::new("/proj");
        assert_eq!(
            relative_path(root, &root.join("a").join("b.md")).as_deref(),
            Some("a/b.md")
        );
        assert_eq!(relative_path(root, root), None);
    }
}
