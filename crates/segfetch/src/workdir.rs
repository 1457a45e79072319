//! Per-manifest temporary directory.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::FetchError;

pub const TEMP_DIR: &str = ".TEMP";
pub const RESIDUAL_DIR: &str = ".residual";

/// Create `<folder>/.TEMP` and park anything already inside it in
/// `<folder>/.TEMP/.residual`, which is emptied first.
pub async fn prepare_work_dir(folder: &Path) -> Result<PathBuf, FetchError> {
    let work_dir = folder.join(TEMP_DIR);
    let residual = work_dir.join(RESIDUAL_DIR);

    tokio::fs::create_dir_all(&work_dir)
        .await
        .map_err(|e| FetchError::path_io(&work_dir, e))?;

    if tokio::fs::try_exists(&residual).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(&residual)
            .await
            .map_err(|e| FetchError::path_io(&residual, e))?;
    }
    tokio::fs::create_dir(&residual)
        .await
        .map_err(|e| FetchError::path_io(&residual, e))?;

    let mut entries = tokio::fs::read_dir(&work_dir)
        .await
        .map_err(|e| FetchError::path_io(&work_dir, e))?;
    let mut moved = 0usize;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| FetchError::path_io(&work_dir, e))?
    {
        if entry.file_name() == RESIDUAL_DIR {
            continue;
        }
        let target = residual.join(entry.file_name());
        tokio::fs::rename(entry.path(), &target)
            .await
            .map_err(|e| FetchError::path_io(entry.path(), e))?;
        moved += 1;
    }
    if moved > 0 {
        debug!(dir = %work_dir.display(), moved, "moved leftovers to residual folder");
    }
    Ok(work_dir)
}
