use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

/// Writes text using a temp file + rename so readers never observe partial data.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("hearth-state"),
        std::process::id(),
        current_unix_timestamp_ms()
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to rename temporary file {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

/// Creates `path` and writes `content`, failing if the file already exists.
///
/// Returns the raw `io::Error` so callers can tell `AlreadyExists` apart from
/// other persistence failures.
pub fn write_text_exclusive(path: &Path, content: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}

/// Removes `path` only while it still holds exactly `expected`.
///
/// The file is renamed aside before comparing, so a replacement written by
/// another process after `expected` was read is never deleted: a mismatched
/// file is linked back into place. Returns whether the file was removed.
pub fn remove_if_unchanged(path: &Path, expected: &[u8]) -> std::io::Result<bool> {
    let aside = path.with_file_name(format!(
        ".{}.reclaim-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("hearth-lock"),
        std::process::id(),
        current_unix_timestamp_ms()
    ));
    match std::fs::rename(path, &aside) {
        Ok(()) => {}
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(false),
        Err(error) => return Err(error),
    }

    let unchanged = std::fs::read(&aside).map(|current| current == expected);
    if matches!(unchanged, Ok(true)) {
        std::fs::remove_file(&aside)?;
        return Ok(true);
    }
    match std::fs::hard_link(&aside, path) {
        Ok(()) => {}
        Err(error) if is_already_exists(&error) => {
            tracing::warn!(path = %path.display(), "lock was recreated while restoring a changed owner");
        }
        Err(error) => return Err(error),
    }
    std::fs::remove_file(&aside)?;
    unchanged.map(|_| false)
}

/// Returns true when `error` means the target already existed.
pub fn is_already_exists(error: &std::io::Error) -> bool {
    error.kind() == ErrorKind::AlreadyExists
}
