//! Crash-safe whole-file replacement.
//!
//! Every durable store in this crate rewrites its file in full. Writes go to
//! a sibling `<name>.tmp` file which is flushed to disk and then renamed over
//! the target, so readers only ever observe the previous or the new contents.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Sibling temporary path used while replacing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("state"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replace `path` with `contents`.
///
/// Returns only after the data and the rename have been synced.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    sync_parent_dir(path).await
}

/// Read `path`, treating a missing file as `None`.
///
/// A leftover temporary file from an interrupted write is discarded; the
/// target still holds the last fully written state.
pub async fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    let tmp = temp_path(path);
    match tokio::fs::remove_file(&tmp).await {
        Ok(()) => tracing::warn!(path = %tmp.display(), "Discarded interrupted write"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Create the parent directory of `path` if needed.
pub async fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tokio::fs::File::open(parent).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
