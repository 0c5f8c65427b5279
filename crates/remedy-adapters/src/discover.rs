//! Input file discovery.

use crate::backup::DEFAULT_BACKUP_DIR;
use remedy_core::parser::Language;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IGNORED_DIRS: &[&str] = &[
    "target",
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    "dist",
    "build",
    "__pycache__",
    ".pytest_cache",
    "vendor",
    ".idea",
    ".vscode",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverOptions {
    /// Lowercase, without the leading dot.
    pub extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub follow_symlinks: bool,
    /// Never descended into, so backups are not fixed again.
    pub backup_dir_name: String,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["ps1".into(), "psm1".into(), "psd1".into()],
            exclude_dirs: Vec::new(),
            follow_symlinks: false,
            backup_dir_name: DEFAULT_BACKUP_DIR.to_string(),
        }
    }
}

impl DiscoverOptions {
    fn wants(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|e| *e == ext)
            && Language::from_extension(&ext) != Language::Unknown
    }

    fn is_ignored_dir(&self, name: &str) -> bool {
        IGNORED_DIRS.contains(&name)
            || name == self.backup_dir_name
            || self.exclude_dirs.iter().any(|d| d == name)
            || name.starts_with('.')
    }
}

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),
    #[error("could not walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Expand `paths` into a sorted, de-duplicated list of source files.
///
/// Directories are walked recursively, skipping build output, VCS metadata,
/// hidden directories and the backup directory. Files named explicitly are
/// kept when their language is supported, whatever the extension filter says.
pub fn discover_files(
    paths: &[PathBuf],
    options: &DiscoverOptions,
) -> Result<Vec<PathBuf>, DiscoverError> {
    let mut found = BTreeSet::new();
    for root in paths {
        if root.is_file() {
            if Language::from_path(root) != Language::Unknown {
                found.insert(root.clone());
            } else {
                tracing::warn!(path = %root.display(), "skipping file with unsupported language");
            }
            continue;
        }
        if !root.exists() {
            return Err(DiscoverError::NotFound(root.clone()));
        }

        let walker = walkdir::WalkDir::new(root)
            .follow_links(options.follow_symlinks)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !options.is_ignored_dir(&e.file_name().to_string_lossy())
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    return Err(DiscoverError::Walk {
                        path: root.clone(),
                        source: err,
                    })
                }
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && options.wants(entry.path()) {
                found.insert(entry.into_path());
            }
        }
    }
    Ok(found.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_walks_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("a.ps1"));
        touch(&root.join("lib/b.PSM1"));
        touch(&root.join("lib/notes.txt"));
        touch(&root.join("lib/main.rs"));
        touch(&root.join(".remedy-backups/a.ps1.20260101T000000.000Z.bak"));
        touch(&root.join(".git/hooks/x.ps1"));
        touch(&root.join("node_modules/m.ps1"));
        touch(&root.join("skipme/c.ps1"));

        let options = DiscoverOptions {
            exclude_dirs: vec!["skipme".to_string()],
            ..DiscoverOptions::default()
        };
        let files = discover_files(&[root.to_path_buf()], &options).unwrap();
        let rel: Vec<PathBuf> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(rel, vec![PathBuf::from("a.ps1"), PathBuf::from("lib/b.PSM1")]);
    }

    #[test]
    fn test_explicit_files_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("a.ps1");
        let rust = dir.path().join("main.rs");
        touch(&script);
        touch(&rust);
        let files = discover_files(
            &[script.clone(), rust.clone(), dir.path().to_path_buf()],
            &DiscoverOptions::default(),
        )
        .unwrap();
        assert_eq!(files, vec![script, rust]);
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_files(&[dir.path().join("gone")], &DiscoverOptions::default());
        assert!(matches!(err, Err(DiscoverError::NotFound(_))));
    }
}
