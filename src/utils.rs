// ABOUTME: Utility functions for the big-export pipeline
// ABOUTME: Path validation, directory handling, temp file naming and formatting helpers

use crate::errors::{ExportError, Result};
use log::{debug, warn};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Prefix shared by every temp file the pipeline creates.
pub const TEMP_PREFIX: &str = "big-export-";

/// True if the path contains a `..` segment.
pub fn has_traversal(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Reject paths that try to climb out of their directory
pub fn validate_safe_path(path: &Path, field: &str) -> Result<()> {
    if has_traversal(path) {
        return Err(ExportError::validation(
            field,
            format!("{} must not contain '..': {:?}", field, path),
        ));
    }
    Ok(())
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| {
            ExportError::filesystem(format!("failed to create directory {:?}", path), e)
        })?;
    } else if !path.is_dir() {
        return Err(ExportError::new(
            crate::errors::ErrorType::Filesystem,
            format!("path exists but is not a directory: {:?}", path),
        )
        .with_retryable(false));
    }
    Ok(())
}

/// Ensure a file's parent directory exists
pub fn ensure_parent_directory_exists(file_path: &Path) -> Result<()> {
    if let Some(parent) = file_path.parent() {
        ensure_directory_exists(parent)?;
    }
    Ok(())
}

/// Get the absolute path without requiring it to exist
pub fn get_absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Size of a file in bytes, zero if it cannot be read
pub fn file_size(path: &Path) -> u64 {
    match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            debug!("Could not stat {:?}: {}", path, e);
            0
        }
    }
}

/// A unique temp file path inside `dir`
pub fn temp_file_path(dir: &Path, label: &str, extension: &str) -> PathBuf {
    dir.join(format!(
        "{}{}-{}.{}",
        TEMP_PREFIX,
        label,
        uuid::Uuid::new_v4(),
        extension
    ))
}

/// Removes a temp file when dropped.
pub struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Failed to remove temp file {:?}: {}", self.path, e);
            }
        }
    }
}

/// Human-readable duration, e.g. `1.25s` or `340ms`
pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs() > 0 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
