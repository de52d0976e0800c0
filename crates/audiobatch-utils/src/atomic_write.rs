//! Atomic file replacement
//!
//! Writers stage content in a temporary file in the target's directory, fsync it, and rename
//! it over the target, so a concurrent reader sees either the old document or the new one,
//! never a torn write. When the rename crosses filesystems the content is copied, fsynced,
//! and moved into place instead.

use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

#[derive(Debug, Clone, Default)]
pub struct AtomicWriteResult {
    /// Whether the copy-based cross-filesystem fallback was used
    pub used_cross_filesystem_fallback: bool,
    pub bytes_written: usize,
}

/// Atomically replace `path` with `content`, creating parent directories as needed
pub fn write_file_atomic(path: &Utf8Path, content: &str) -> Result<AtomicWriteResult> {
    let mut result = AtomicWriteResult {
        bytes_written: content.len(),
        ..AtomicWriteResult::default()
    };

    let temp_dir = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(temp_dir)
        .with_context(|| format!("Failed to create parent directory: {temp_dir}"))?;

    let mut temp_file = NamedTempFile::new_in(temp_dir)
        .with_context(|| format!("Failed to create temporary file in: {temp_dir}"))?;
    temp_file
        .write_all(content.as_bytes())
        .context("Failed to write content to temporary file")?;
    temp_file
        .as_file()
        .sync_all()
        .context("Failed to fsync temporary file")?;

    match temp_file.persist(path.as_std_path()) {
        Ok(_) => {}
        Err(e) if is_cross_filesystem_error(&e.error) => {
            result.used_cross_filesystem_fallback = true;
            tracing::debug!(path = %path, "Rename crossed filesystems; using copy fallback");
            // The staged file is removed when `staged` drops
            let staged = e.file;
            cross_filesystem_copy(staged.path(), path)?;
        }
        Err(e) => {
            return Err(e.error).with_context(|| format!("Failed to atomically write file: {path}"));
        }
    }

    Ok(result)
}

#[cfg(unix)]
fn is_cross_filesystem_error(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(18) // EXDEV
}

#[cfg(not(unix))]
fn is_cross_filesystem_error(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
}

/// copy → fsync → rename from a sibling staging file next to the target
fn cross_filesystem_copy(source: &Path, target: &Utf8Path) -> Result<()> {
    let staging = target.with_extension("audiobatch-staging");
    fs::copy(source, &staging)
        .with_context(|| format!("Failed to copy staged content to {staging}"))?;
    fs::File::open(&staging)
        .and_then(|f| f.sync_all())
        .with_context(|| format!("Failed to fsync {staging}"))?;
    fs::rename(&staging, target).with_context(|| format!("Failed to move {staging} to {target}"))?;
    Ok(())
}
