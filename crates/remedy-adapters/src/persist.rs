//! Backup-then-write persistence for one file
//!
//! ```text
//! Pending -> BackedUp -> Written
//!    \          \
//!     +----------+--> Failed
//! ```
//!
//! The target stays locked from the freshness check through the final
//! rename, so a concurrent `remedy` run cannot interleave its own backup.

use crate::atomic::write_atomic;
use crate::backup::{BackupError, BackupRecord, BackupStore};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

const LOCK_TIMEOUT_SECS: u64 = 5;
const LOCK_RETRY_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistState {
    Pending,
    BackedUp,
    Written,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistResult {
    pub state: PersistState,
    pub backup: Option<BackupRecord>,
    pub written: bool,
}

impl PersistResult {
    fn untouched() -> Self {
        Self {
            state: PersistState::Pending,
            backup: None,
            written: false,
        }
    }

    pub fn backup_path(&self) -> Option<&Path> {
        self.backup.as_ref().map(|b| b.backup_path.as_path())
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("could not lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not re-read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} changed on disk since it was read")]
    StaleContent { path: PathBuf },
    #[error("backup failed, {path} left untouched: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: BackupError,
    },
    /// The backup exists, so the original is recoverable from it.
    #[error("write failed for {path} (original saved at {}): {source}", .backup.backup_path.display())]
    Write {
        path: PathBuf,
        backup: Box<BackupRecord>,
        #[source]
        source: io::Error,
    },
}

impl PersistError {
    /// The backup taken before a failed write, if there is one.
    pub fn backup(&self) -> Option<&BackupRecord> {
        match self {
            PersistError::Write { backup, .. } => Some(&**backup),
            _ => None,
        }
    }
}

/// Final write of new content over an existing file.
pub trait ContentWriter: Send + Sync {
    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AtomicWriter;

impl ContentWriter for AtomicWriter {
    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        write_atomic(path, content)
    }
}

#[derive(Clone)]
pub struct Persister {
    store: BackupStore,
    writer: Arc<dyn ContentWriter>,
    run_id: Option<Uuid>,
}

impl Persister {
    pub fn new(store: BackupStore) -> Self {
        Self {
            store,
            writer: Arc::new(AtomicWriter),
            run_id: None,
        }
    }

    pub fn with_writer(mut self, writer: Arc<dyn ContentWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    /// Persist `final_content` over `path`, which held `original` when it
    /// was read.
    ///
    /// Dry runs and unchanged content touch nothing. Otherwise the on-disk
    /// bytes are backed up first and the new content is only written once
    /// the backup is safely on disk.
    pub fn persist(
        &self,
        path: &Path,
        original: &str,
        final_content: &str,
        dry_run: bool,
    ) -> Result<PersistResult, PersistError> {
        if dry_run || final_content == original {
            return Ok(PersistResult::untouched());
        }

        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|source| PersistError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let _lock = TargetLock::acquire(&file).map_err(|source| PersistError::Lock {
            path: path.to_path_buf(),
            source,
        })?;

        let mut on_disk = Vec::new();
        (&file)
            .read_to_end(&mut on_disk)
            .map_err(|source| PersistError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if on_disk != original.as_bytes() {
            return Err(PersistError::StaleContent {
                path: path.to_path_buf(),
            });
        }

        let backup = self
            .store
            .create(path, &on_disk, self.run_id)
            .map_err(|source| PersistError::Backup {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!(path = %path.display(), state = "backed_up", "persist");

        if let Err(source) = self.writer.write(path, final_content.as_bytes()) {
            tracing::error!(
                path = %path.display(),
                backup = %backup.backup_path.display(),
                error = %source,
                "write failed after backup"
            );
            return Err(PersistError::Write {
                path: path.to_path_buf(),
                backup: Box::new(backup),
                source,
            });
        }
        tracing::info!(path = %path.display(), backup = %backup.backup_path.display(), "file written");

        Ok(PersistResult {
            state: PersistState::Written,
            backup: Some(backup),
            written: true,
        })
    }
}

struct TargetLock<'a> {
    file: &'a File,
}

impl<'a> TargetLock<'a> {
    fn acquire(file: &'a File) -> io::Result<Self> {
        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(file) {
                Ok(()) => return Ok(Self { file }),
                Err(err) if err.kind() != ErrorKind::WouldBlock => return Err(err),
                Err(_) if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) => {
                    return Err(io::Error::new(
                        ErrorKind::TimedOut,
                        format!("timed out waiting for file lock ({}s)", LOCK_TIMEOUT_SECS),
                    ));
                }
                Err(_) => std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS)),
            }
        }
    }
}

impl Drop for TargetLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}
