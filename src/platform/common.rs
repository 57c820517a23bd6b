use crate::Result;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Atomically write content to a file
///
/// This function writes to a temporary file in the same directory,
/// syncs to disk, then renames to the target path. This ensures
/// the write is atomic on Unix and NTFS filesystems.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory_exists(parent)?;
    }

    let temp_path = path.with_extension("tmp");

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    restrict_to_owner(&temp_path)?;

    // Rename to target path (atomic operation)
    std::fs::rename(&temp_path, path)?;

    Ok(())
}

/// Ensure a directory exists, creating it and all parents if needed
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if !path.as_os_str().is_empty() && !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    Ok(())
}

/// Open `path` (creating it if needed) and block until this handle holds an
/// exclusive lock on it
///
/// The lock is advisory and released when the returned file is dropped. Two
/// handles conflict even inside one process.
pub fn lock_exclusive(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        ensure_directory_exists(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    restrict_to_owner(path)?;

    fs2::FileExt::lock_exclusive(&file)?;
    Ok(file)
}

/// Make a file readable and writable by its owner only (Unix only, no-op on Windows)
///
/// The state file holds the PIN hash and lockout counters, which the child's
/// account must not be able to edit.
pub fn restrict_to_owner(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_mode(0o600);
        std::fs::set_permissions(path, permissions)?;
    }

    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write() {
        let temp_dir = tempdir().unwrap();
        let test_file = temp_dir.path().join("state.json");

        let content = b"{\"version\":\"1.0\"}";
        atomic_write(&test_file, content).unwrap();

        let mut file = File::open(&test_file).unwrap();
        let mut read_content = Vec::new();
        file.read_to_end(&mut read_content).unwrap();

        assert_eq!(content, &read_content[..]);
        assert!(!test_file.with_extension("tmp").exists());
    }

    #[test]
    fn test_atomic_write_nested_path() {
        let temp_dir = tempdir().unwrap();
        let test_file = temp_dir.path().join("nested").join("path").join("state.json");

        atomic_write(&test_file, b"nested content").unwrap();

        assert_eq!(std::fs::read(&test_file).unwrap(), b"nested content");
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let temp_dir = tempdir().unwrap();
        let test_file = temp_dir.path().join("state.json");

        atomic_write(&test_file, b"first").unwrap();
        atomic_write(&test_file, b"second").unwrap();

        assert_eq!(std::fs::read(&test_file).unwrap(), b"second");
    }

    #[cfg(unix)]
    #[test]
    fn test_written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempdir().unwrap();
        let test_file = temp_dir.path().join("state.json");
        atomic_write(&test_file, b"secret").unwrap();

        let mode = std::fs::metadata(&test_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let temp_dir = tempdir().unwrap();
        let lock_path = temp_dir.path().join("state.lock");

        let held = lock_exclusive(&lock_path).unwrap();

        let other = File::open(&lock_path).unwrap();
        assert!(fs2::FileExt::try_lock_exclusive(&other).is_err());

        drop(held);
        assert!(fs2::FileExt::try_lock_exclusive(&other).is_ok());
    }

    #[test]
    fn test_ensure_directory_exists_idempotent() {
        let temp_dir = tempdir().unwrap();
        let test_dir = temp_dir.path().join("idempotent_test");

        ensure_directory_exists(&test_dir).unwrap();
        ensure_directory_exists(&test_dir).unwrap();
        assert!(test_dir.is_dir());
    }
}
