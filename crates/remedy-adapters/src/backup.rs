//! Timestamped backups of files before they are rewritten
//!
//! Backups are byte-for-byte copies of the pre-fix content. Every backup is
//! recorded as one JSON line in a manifest next to it so `restore` can find
//! the newest copy of a file later. Nothing here ever deletes a backup.

use crate::atomic::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_BACKUP_DIR: &str = ".remedy-backups";
pub const MANIFEST_FILE: &str = "manifest.jsonl";
/// Manifest name when backups sit next to their originals.
pub const ALONGSIDE_MANIFEST_FILE: &str = ".remedy-manifest.jsonl";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";
const MAX_COLLISION_SUFFIX: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupLocation {
    /// `<dir>/.remedy-backups/<file>.<timestamp>.bak`
    #[default]
    Sibling,
    /// `<dir>/<file>.<timestamp>.bak`
    Alongside,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub bytes: u64,
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not record backup in {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no backup recorded for {0}")]
    NotFound(PathBuf),
}

fn io_err<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> BackupError + 'a {
    move |source| BackupError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupStore {
    location: BackupLocation,
    dir_name: String,
}

impl Default for BackupStore {
    fn default() -> Self {
        Self::new(BackupLocation::default(), DEFAULT_BACKUP_DIR)
    }
}

impl BackupStore {
    pub fn new(location: BackupLocation, dir_name: impl Into<String>) -> Self {
        Self {
            location,
            dir_name: dir_name.into(),
        }
    }

    pub fn location(&self) -> BackupLocation {
        self.location
    }

    pub fn dir_name(&self) -> &str {
        &self.dir_name
    }

    /// Directory that holds backups of `original`.
    pub fn backup_dir_for(&self, original: &Path) -> PathBuf {
        let parent = parent_dir(original);
        match self.location {
            BackupLocation::Sibling => parent.join(&self.dir_name),
            BackupLocation::Alongside => parent,
        }
    }

    pub fn manifest_path_for(&self, original: &Path) -> PathBuf {
        let dir = self.backup_dir_for(original);
        match self.location {
            BackupLocation::Sibling => dir.join(MANIFEST_FILE),
            BackupLocation::Alongside => dir.join(ALONGSIDE_MANIFEST_FILE),
        }
    }

    /// Backup path for `original` at `timestamp`, before collision handling.
    pub fn backup_path_for(&self, original: &Path, timestamp: DateTime<Utc>) -> PathBuf {
        let name = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.backup_dir_for(original).join(format!(
            "{}.{}.bak",
            name,
            timestamp.format(TIMESTAMP_FORMAT)
        ))
    }

    /// Copy `content` (the bytes currently on disk at `original`) into a new
    /// backup file and record it in the manifest.
    pub fn create(
        &self,
        original: &Path,
        content: &[u8],
        run_id: Option<Uuid>,
    ) -> Result<BackupRecord, BackupError> {
        let dir = self.backup_dir_for(original);
        fs::create_dir_all(&dir).map_err(io_err("create backup directory", &dir))?;

        let timestamp = Utc::now();
        let base = self.backup_path_for(original, timestamp);
        let (backup_path, mut file) = create_unique(&base)?;
        file.write_all(content)
            .and_then(|()| file.sync_all())
            .map_err(io_err("write backup", &backup_path))?;

        let record = BackupRecord {
            original_path: canonical_or_self(original),
            backup_path,
            timestamp,
            run_id,
            bytes: content.len() as u64,
        };
        self.append_manifest(original, &record)?;
        tracing::debug!(
            path = %original.display(),
            backup = %record.backup_path.display(),
            "backup created"
        );
        Ok(record)
    }

    fn append_manifest(&self, original: &Path, record: &BackupRecord) -> Result<(), BackupError> {
        let path = self.manifest_path_for(original);
        let row = serde_json::to_string(record).map_err(|source| BackupError::Manifest {
            path: path.clone(),
            source,
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err("open manifest", &path))?;
        writeln!(file, "{}", row).map_err(io_err("append to manifest", &path))
    }

    /// Every recorded backup of `original`, oldest first.
    pub fn records_for(&self, original: &Path) -> Result<Vec<BackupRecord>, BackupError> {
        let manifest = self.manifest_path_for(original);
        let content = match fs::read_to_string(&manifest) {
            Ok(c) => c,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err("read manifest", &manifest)(err)),
        };
        let wanted = canonical_or_self(original);
        let mut records: Vec<BackupRecord> = content
            .lines()
            .filter_map(|line| serde_json::from_str::<BackupRecord>(line).ok())
            .filter(|r| r.original_path == wanted)
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    pub fn latest_for(&self, original: &Path) -> Result<BackupRecord, BackupError> {
        self.records_for(original)?
            .pop()
            .ok_or_else(|| BackupError::NotFound(original.to_path_buf()))
    }
}

/// Put a backup's bytes back over its original, atomically.
pub fn restore(record: &BackupRecord) -> Result<(), BackupError> {
    let content = fs::read(&record.backup_path).map_err(io_err("read backup", &record.backup_path))?;
    write_atomic(&record.original_path, &content)
        .map_err(io_err("restore", &record.original_path))?;
    tracing::info!(
        path = %record.original_path.display(),
        backup = %record.backup_path.display(),
        "restored from backup"
    );
    Ok(())
}

/// Create `base`, or `<stem>.<n>.bak` when it already exists.
fn create_unique(base: &Path) -> Result<(PathBuf, fs::File), BackupError> {
    let stem = base.with_extension("");
    for n in 0..MAX_COLLISION_SUFFIX {
        let candidate = if n == 0 {
            base.to_path_buf()
        } else {
            stem.with_file_name(format!(
                "{}.{}.bak",
                stem.file_name().map(|s| s.to_string_lossy()).unwrap_or_default(),
                n
            ))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(io_err("create backup", &candidate)(err)),
        }
    }
    Err(BackupError::Io {
        action: "create backup",
        path: base.to_path_buf(),
        source: io::Error::new(ErrorKind::AlreadyExists, "too many backups with this timestamp"),
    })
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn canonical_or_self(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
