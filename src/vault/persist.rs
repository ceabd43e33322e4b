//! Crash-safe reads and writes of vault files.
//!
//! Every write goes to a temporary file in the same directory as the
//! target, is synced to disk, and is then renamed over the target.  The
//! containing directory is synced afterwards where the platform allows
//! it.  Readers therefore see either the old file or the new one, never
//! a partial write.
//!
//! There is no cross-process locking: concurrent writers race at the
//! rename and the last one wins.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::errors::{EnvVaultError, Result};

/// How `commit` treats an existing file at the target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Atomically replace whatever is there.
    Replace,
    /// Fail with `VaultAlreadyExists` if the target already exists.
    CreateNew,
}

/// Read a vault file into memory.
///
/// A missing file is reported as `VaultNotFound`.
pub fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => EnvVaultError::VaultNotFound(path.to_path_buf()),
        _ => EnvVaultError::Io(e),
    })
}

/// Durably write `bytes` to `path`.
///
/// On any failure before the rename the temporary file is removed and
/// the original file (if any) is untouched.
pub fn commit(path: &Path, bytes: &[u8], mode: CommitMode) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
    }

    let persisted = match mode {
        CommitMode::Replace => tmp.persist(path),
        CommitMode::CreateNew => tmp.persist_noclobber(path),
    };

    if let Err(err) = persisted {
        return Err(match err.error.kind() {
            io::ErrorKind::AlreadyExists => EnvVaultError::VaultAlreadyExists(path.to_path_buf()),
            _ => EnvVaultError::Io(err.error),
        });
    }

    sync_dir(parent);

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "vault file committed");
    Ok(())
}

/// Sync a directory so a completed rename survives a crash.
///
/// Failures only warn: the data itself is already on disk.
fn sync_dir(path: &Path) {
    #[cfg(unix)]
    {
        match fs::File::open(path) {
            Ok(dir) => {
                if let Err(err) = dir.sync_all() {
                    tracing::warn!(path = %path.display(), error = %err, "directory sync failed");
                }
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "directory open failed");
            }
        }
    }

    #[cfg(not(unix))]
    let _ = path;
}
