//! Cross-platform filesystem primitives the mailbox protocol is built on
//!
//! The bridge has no lock manager. Every coordination step reduces to one
//! of these operations:
//! - `write_atomic`: write to a hidden temporary, then rename into place
//! - `publish_exclusive`: like `write_atomic`, but never replaces an existing file
//! - `atomic_rename`: rename, replacing the target (Windows needs an explicit delete)
//! - `normalize_path`: strips the Windows `\\?\` prefix from canonicalized paths

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Normalize Windows paths by removing the `\\?\` prefix if present.
///
/// Canonicalized mailbox paths are used as keys for the per-process poller
/// claim, so both spellings of the same directory must compare equal.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use mailbridge::fs_utils::normalize_path;
///
/// // On Unix, path is returned unchanged
/// let path = PathBuf::from("/home/user/mailbox");
/// assert_eq!(normalize_path(&path), path);
/// ```
pub fn normalize_path(path: &Path) -> PathBuf {
    #[cfg(windows)]
    {
        let s = path.to_string_lossy();
        // Handle UNC paths: \\?\UNC\server\share -> \\server\share
        if let Some(stripped) = s.strip_prefix(r"\\?\UNC\") {
            return PathBuf::from(format!(r"\\{}", stripped));
        }
        // Handle local paths: \\?\C:\path -> C:\path
        if let Some(stripped) = s.strip_prefix(r"\\?\") {
            return PathBuf::from(stripped);
        }
    }
    path.to_path_buf()
}

/// Canonical key for a directory, falling back to the path as given
/// when it cannot be resolved.
pub fn canonical_key(path: &Path) -> PathBuf {
    normalize_path(&path.canonicalize().unwrap_or_else(|_| path.to_path_buf()))
}

/// Cross-platform atomic rename that handles Windows file replacement.
///
/// On Unix, `fs::rename` atomically replaces the target if it exists.
/// On Windows, `fs::rename` fails if the target exists, so the target is
/// deleted first.
pub fn atomic_rename(src: &Path, dst: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        if dst.exists() {
            fs::remove_file(dst)?;
        }
    }
    fs::rename(src, dst)
}

/// Hidden temporary sibling of `path`.
///
/// Starts with a dot so it never matches a request or signal file name.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unique = uuid::Uuid::new_v4().simple().to_string();
    path.with_file_name(format!(".{}.{}.tmp", name, &unique[..12]))
}

/// Write `contents` to `path` so readers only ever observe the complete file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let temp = temp_sibling(path);
    fs::write(&temp, contents)?;
    if let Err(e) = atomic_rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    Ok(())
}

/// Write `contents` to `path` only if `path` does not exist yet.
///
/// Returns `Ok(false)` when the file already existed, leaving it untouched.
/// The complete file is linked into place in one step; on filesystems
/// without hard links it falls back to a create-new open, where a reader
/// may briefly see a partial file.
pub fn publish_exclusive(path: &Path, contents: &[u8]) -> io::Result<bool> {
    let temp = temp_sibling(path);
    fs::write(&temp, contents)?;
    let linked = fs::hard_link(&temp, path);
    let _ = fs::remove_file(&temp);

    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => {
            tracing::debug!(
                "hard link unavailable for {} ({}), using create_new",
                path.display(),
                e
            );
            create_new(path, contents)
        }
    }
}

fn create_new(path: &Path, contents: &[u8]) -> io::Result<bool> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(true)
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
