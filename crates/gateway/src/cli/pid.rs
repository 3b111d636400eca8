//! PID file handling for daemon-style operation.
//!
//! With `server.pid_file` set, startup writes the PID to that path and
//! keeps an `fs2` exclusive lock on the open handle. A second instance
//! pointed at the same path fails before it can bind a conflicting
//! port. Shutdown releases the lock and deletes the file through
//! [`remove_pid_file`].

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use fs2::FileExt;

/// Record the current PID at `path` under an exclusive advisory lock.
///
/// The returned [`File`] carries the lock; the caller keeps it alive for
/// as long as the server runs. Fails when another process holds the lock
/// or on filesystem errors.
pub fn write_pid_file(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = open_locked(path)?;

    let pid = std::process::id();
    // The locked handle itself is returned, so write through a reborrow.
    let mut out = &file;
    out.write_all(format!("{pid}\n").as_bytes())?;
    out.flush()?;

    tracing::info!(path = %path.display(), pid, "PID file written");
    Ok(file)
}

fn open_locked(path: &Path) -> anyhow::Result<File> {
    let file = File::options()
        .create(true)
        .truncate(true)
        .write(true)
        .read(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("cannot open PID file {}: {e}", path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(_) => Err(anyhow::anyhow!(
            "PID file {} is locked; another Tern instance is running",
            path.display()
        )),
    }
}

/// Delete the PID file. Dropping `_handle` releases the advisory lock;
/// deleting the file as well keeps stale paths from confusing process
/// managers.
pub fn remove_pid_file(path: &Path, _handle: File) {
    match fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "PID file removed"),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not remove PID file");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
