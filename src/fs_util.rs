use std::ffi::OsString;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

const CREDENTIAL_FILE_MODE: u32 = 0o600;
const KEYS_DIR_MODE: u32 = 0o700;
const TEMP_SUFFIX: &str = ".tmp";

/// Creates the parent directory of `path`, tolerating a directory that
/// appears between the existence check and the creation call.
///
/// # Errors
/// Returns an error if `path` has no parent or the directory cannot be created.
pub async fn ensure_parent_dir(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} has no parent directory", path.display()))?;
    match fs::create_dir_all(parent).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::AlreadyExists && parent.is_dir() => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to create directory {}", parent.display()));
        }
    }
    Ok(parent.to_path_buf())
}

/// Ensures the directory holding client credentials exists and is private.
///
/// # Errors
/// Returns an error if the directory cannot be created or permissions cannot be set.
pub async fn ensure_private_parent_dir(path: &Path) -> Result<()> {
    let parent = ensure_parent_dir(path).await?;
    fs::set_permissions(&parent, std::fs::Permissions::from_mode(KEYS_DIR_MODE))
        .await
        .with_context(|| format!("Failed to set permissions on {}", parent.display()))?;
    Ok(())
}

/// Writes `contents` next to `path` and renames it into place, so readers
/// never observe a partially written file.
///
/// # Errors
/// Returns an error if the parent directory cannot be created or the file
/// cannot be written or renamed.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    write_atomic_with_mode(path, contents, None).await
}

/// Same as [`write_atomic`] but restricts the file to its owner.
///
/// # Errors
/// Returns an error if the file cannot be written, restricted, or renamed.
pub async fn write_private_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    write_atomic_with_mode(path, contents, Some(CREDENTIAL_FILE_MODE)).await
}

async fn write_atomic_with_mode(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<()> {
    ensure_parent_dir(path).await?;
    let temp_path = temp_path_for(path)?;

    let result = write_then_rename(&temp_path, path, contents, mode).await;
    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    result
}

async fn write_then_rename(
    temp_path: &Path,
    path: &Path,
    contents: &[u8],
    mode: Option<u32>,
) -> Result<()> {
    fs::write(temp_path, contents)
        .await
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    if let Some(mode) = mode {
        fs::set_permissions(temp_path, std::fs::Permissions::from_mode(mode))
            .await
            .with_context(|| format!("Failed to set permissions on {}", temp_path.display()))?;
    }
    fs::rename(temp_path, path)
        .await
        .with_context(|| format!("Failed to move file into place at {}", path.display()))
}

fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("{} has no file name", path.display()))?;
    let mut temp_name = OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(TEMP_SUFFIX);
    Ok(path.with_file_name(temp_name))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_ensure_parent_dir_tolerates_existing_dir() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("b").join("file.json");

        ensure_parent_dir(&target).await.unwrap();
        ensure_parent_dir(&target).await.unwrap();

        assert!(dir.path().join("a").join("b").is_dir());
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_rejects_file_in_the_way() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("blocker"), "x").await.unwrap();
        let target = dir.path().join("blocker").join("file.json");

        let err = ensure_parent_dir(&target).await.unwrap_err();

        assert!(err.to_string().contains("Failed to create directory"));
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_contents_without_leftovers() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("eip-service.json");

        write_atomic(&target, b"first").await.unwrap();
        write_atomic(&target, b"second").await.unwrap();

        assert_eq!(fs::read(&target).await.unwrap(), b"second");
        let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_write_private_atomic_sets_owner_only_mode() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("keys").join("client").join("openvpn.pem");

        ensure_private_parent_dir(&target).await.unwrap();
        write_private_atomic(&target, b"cert-data").await.unwrap();

        let file_mode = std::fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        let dir_mode = std::fs::metadata(target.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, CREDENTIAL_FILE_MODE);
        assert_eq!(dir_mode, KEYS_DIR_MODE);
    }
}
