//! All-or-nothing file replacement.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Replace `path` with `content` so other processes see either the old file
/// or the new one, never a partial write.
///
/// The content goes to a uniquely named temp file in the same directory,
/// which is synced and then renamed over the target. An existing target's
/// permissions carry over to the new file.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let tmp_path = temp_path_for(path)?;
    let result = write_temp(&tmp_path, path, content).and_then(|()| fs::rename(&tmp_path, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_temp(tmp_path: &Path, target: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    if let Ok(meta) = fs::metadata(target) {
        if let Err(err) = fs::set_permissions(tmp_path, meta.permissions()) {
            tracing::debug!(path = %tmp_path.display(), error = %err, "could not copy permissions");
        }
    }
    Ok(())
}

/// `.<name>.<uuid>.tmp` next to `path`.
pub fn temp_path_for(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;
    let tmp_name = format!(
        ".{}.{}.tmp",
        name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    );
    Ok(path.with_file_name(tmp_name))
}
