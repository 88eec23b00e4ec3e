//! Best-effort cleanup steps.
//!
//! Failures here are logged and swallowed; they never fail the operation
//! that triggered them.

use std::fmt::Display;
use std::io::ErrorKind;
use std::path::Path;

/// Log and discard the error of a step that must not block the caller.
pub fn best_effort<T, E: Display>(action: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(action, %error, "Best-effort step failed, continuing");
            None
        }
    }
}

/// Delete a file, treating "already gone" as success.
pub async fn remove_file_best_effort(path: &Path) {
    tracing::debug!(path = %path.display(), "Removing file");
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        result => {
            best_effort(&format!("unlink {}", path.display()), result);
        }
    }
}

/// Remove an empty directory, treating "already gone" as success.
pub async fn remove_dir_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir(path).await {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        result => result,
    }
}
