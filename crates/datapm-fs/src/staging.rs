use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use crate::{Error, Result};

/// Suffix carried by every staging file.
pub const STAGING_SUFFIX: &str = ".tmp";

#[cfg(unix)]
const DEFAULT_PERMISSIONS: Option<u32> = Some(0o644);

#[cfg(not(unix))]
const DEFAULT_PERMISSIONS: Option<u32> = None;

#[derive(Clone, Copy, Debug)]
pub struct StagingOptions {
    permissions: Option<u32>,
    sync:        bool,
}

impl Default for StagingOptions {
    fn default() -> Self { Self::new() }
}

impl StagingOptions {
    pub fn new() -> Self {
        Self {
            permissions: DEFAULT_PERMISSIONS,
            sync:        true,
        }
    }

    /// Mode applied to the file right before promotion. Ignored off unix.
    pub fn permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode);
        self
    }

    /// Whether to fsync the staged bytes before promotion.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}

/// Returns true for names produced by [`StagedFile`].
pub fn is_staging_name(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') && name.ends_with(STAGING_SUFFIX)
}

/// A file being written beside its final destination.
///
/// The destination is untouched until [`commit`](Self::commit). If the value
/// is dropped first, the staging file is deleted.
pub struct StagedFile {
    file:        tokio::fs::File,
    temp:        TempPath,
    destination: PathBuf,
    written:     u64,
    options:     StagingOptions,
}

impl StagedFile {
    /// Create a staging file for `destination`, creating parent directories
    /// as needed.
    pub async fn create(destination: impl AsRef<Path>, options: StagingOptions) -> Result<Self> {
        let destination = destination.as_ref().to_path_buf();
        let name = destination
            .file_name()
            .ok_or_else(|| Error::InvalidPath(destination.clone()))?
            .to_string_lossy()
            .into_owned();
        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|source| Error::Create {
                path: destination.clone(),
                source,
            })?;

        let prefix = format!(".{name}.");
        let named = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&parent)
            .map_err(|source| Error::Create {
                path: destination.clone(),
                source,
            })?;
        let (file, temp) = named.into_parts();

        tracing::trace!(staging = %temp.display(), "created staging file");

        Ok(Self {
            file: tokio::fs::File::from_std(file),
            temp,
            destination,
            written: 0,
            options,
        })
    }

    pub fn path(&self) -> &Path { &self.temp }

    pub fn destination(&self) -> &Path { &self.destination }

    pub fn bytes_written(&self) -> u64 { self.written }

    /// Append a chunk.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|source| Error::Write {
                path: self.temp.to_path_buf(),
                source,
            })?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Flush the staged bytes and rename them over the destination.
    ///
    /// The rename replaces any entry already at the destination, so
    /// concurrent writers of the same path resolve to the last one.
    pub async fn commit(self) -> Result<PathBuf> {
        let Self {
            mut file,
            temp,
            destination,
            written,
            options,
        } = self;
        let staging = temp.to_path_buf();
        let write_err = |source| Error::Write {
            path: staging.clone(),
            source,
        };

        file.flush().await.map_err(write_err)?;
        if options.sync {
            file.sync_all().await.map_err(write_err)?;
        }
        drop(file);

        #[cfg(unix)]
        if let Some(mode) = options.permissions {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&staging, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(write_err)?;
        }

        temp.persist(&destination).map_err(|e| Error::Promote {
            from:   staging.clone(),
            to:     destination.clone(),
            source: e.error,
        })?;

        tracing::debug!(path = %destination.display(), bytes = written, "promoted staged file");
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_commit_moves_into_place() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("nested").join("entry");

        let mut staged = StagedFile::create(&dest, StagingOptions::new()).await.unwrap();
        staged.write(b"hello ").await.unwrap();
        staged.write(b"world").await.unwrap();
        assert_eq!(staged.bytes_written(), 11);
        assert!(!dest.exists());

        let staging = staged.path().to_path_buf();
        staged.commit().await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_staging_file() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("entry");

        let staging = {
            let mut staged = StagedFile::create(&dest, StagingOptions::new()).await.unwrap();
            staged.write(b"partial").await.unwrap();
            staged.path().to_path_buf()
        };

        assert!(!staging.exists());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_commit_replaces_existing_entry() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("entry");
        std::fs::write(&dest, "old").unwrap();

        let mut staged = StagedFile::create(&dest, StagingOptions::new().sync(false))
            .await
            .unwrap();
        staged.write(b"new").await.unwrap();
        staged.commit().await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_commit_applies_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("entry");

        let staged = StagedFile::create(&dest, StagingOptions::new().permissions(0o640))
            .await
            .unwrap();
        staged.commit().await.unwrap();

        let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn test_staging_names() {
        assert!(is_staging_name(OsStr::new(".weather.a1b2c3.tmp")));
        assert!(!is_staging_name(OsStr::new("weather")));
        assert!(!is_staging_name(OsStr::new("weather.tmp")));
    }

    #[tokio::test]
    async fn test_staging_name_matches_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("weather");

        let staged = StagedFile::create(&dest, StagingOptions::new()).await.unwrap();
        let name = staged.path().file_name().unwrap();

        assert!(is_staging_name(name));
        assert!(name.to_string_lossy().starts_with(".weather."));
        assert_eq!(staged.path().parent(), dest.parent());
    }
}
