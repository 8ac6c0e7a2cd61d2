use sentiscan_core::StorageError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

fn write_failed(path: &Path, e: impl std::fmt::Display) -> StorageError {
    StorageError::WriteFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    path.with_file_name(name)
}

/// The data must be on disk before the rename publishes it.
async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}

/// Writes `contents` to a sibling temp file and renames it over `path`, so
/// readers never observe a half-written file.
pub async fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| write_failed(parent, e))?;
    }

    let tmp = temp_path(path);
    if let Err(e) = write_synced(&tmp, contents).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(write_failed(path, e));
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(write_failed(path, e));
    }
    Ok(())
}

pub async fn atomic_write_json<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| write_failed(path, e))?;
    atomic_write(path, &json).await
}
