use std::io;
use std::path::Path;
use std::time::Duration;

use crate::staging::is_staging_name;
use crate::{Error, Result};

/// Open the complete entry at `path`.
///
/// Returns `Ok(None)` when nothing has been promoted there yet. Staging files
/// never occupy the entry path, so any regular file found is complete.
pub async fn open_complete(path: impl AsRef<Path>) -> Result<Option<tokio::fs::File>> {
    let path = path.as_ref();
    let read_err = |source| Error::Read {
        path: path.to_path_buf(),
        source,
    };

    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(read_err(e)),
    };

    let metadata = file.metadata().await.map_err(read_err)?;
    if metadata.is_file() {
        Ok(Some(file))
    } else {
        Ok(None)
    }
}

/// Remove a complete entry. Returns whether one existed.
pub async fn remove_entry(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(Error::Write {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Delete staging files in `dir` whose last modification is at least
/// `older_than` ago. Returns the number removed.
///
/// Staging files of in-flight writers are younger than any sensible
/// threshold; a zero threshold removes them too.
pub fn sweep_stale(dir: impl AsRef<Path>, older_than: Duration) -> Result<usize> {
    let dir = dir.as_ref();
    let read_err = |source| Error::Read {
        path: dir.to_path_buf(),
        source,
    };

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(read_err(e)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(read_err)?;
        if !is_staging_name(&entry.file_name()) {
            continue;
        }
        let metadata = entry.metadata().map_err(read_err)?;
        if !metadata.is_file() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .unwrap_or_default();
        if age < older_than {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove stale staging file");
            }
        }
    }

    Ok(removed)
}
