use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("path has no file name: '{0}'")]
    InvalidPath(PathBuf),

    #[error("failed to create staging file for '{path}': {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("failed to write staging file '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to promote '{from}' to '{to}': {source}")]
    Promote {
        from:   PathBuf,
        to:     PathBuf,
        source: io::Error,
    },

    #[error("failed to read '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },
}

impl Error {
    /// The I/O error underneath, when there is one.
    pub fn io(&self) -> Option<&io::Error> {
        match self {
            Self::InvalidPath(_) => None,
            Self::Create { source, .. }
            | Self::Write { source, .. }
            | Self::Promote { source, .. }
            | Self::Read { source, .. } => Some(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
