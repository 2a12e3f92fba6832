//! Error types for datapm-stream.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::data::Compression;

#[derive(Debug, Error)]
pub enum Error {
    /// The transport supplying the source bytes failed.
    #[error("failed to read source: {0}")]
    SourceRead(#[source] io::Error),

    #[error("malformed {format} payload: {source}")]
    Decompression {
        format: Compression,
        #[source]
        source: io::Error,
    },

    #[error("{0} payloads are not supported")]
    UnsupportedCompression(Compression),

    /// The cache could not be written. Never fatal to delivery.
    #[error("cache write failed: {0}")]
    CacheWrite(#[from] datapm_fs::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("invalid selection path '{path}': {reason}")]
    InvalidSelectionPath { path: String, reason: &'static str },

    #[error("could not determine the home directory")]
    NoHomeDirectory,
}

impl Error {
    /// Whether the error ends the stream it was raised on.
    ///
    /// Cache failures only demote the cache stage to pass-through.
    pub fn is_fatal(&self) -> bool { !matches!(self, Self::CacheWrite(_)) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    UnexpectedByte(u8),
    UnexpectedToken(&'static str),
    UnexpectedEof,
    InvalidString,
    InvalidNumber,
    InvalidLiteral,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedByte(b) if b.is_ascii_graphic() => {
                write!(f, "unexpected character '{}'", *b as char)
            }
            Self::UnexpectedByte(b) => write!(f, "unexpected byte 0x{b:02x}"),
            Self::UnexpectedToken(token) => write!(f, "unexpected {token}"),
            Self::UnexpectedEof => write!(f, "unexpected end of input"),
            Self::InvalidString => write!(f, "invalid string"),
            Self::InvalidNumber => write!(f, "invalid number"),
            Self::InvalidLiteral => write!(f, "invalid literal"),
        }
    }
}

/// Malformed structured content.
///
/// Positions refer to the decompressed byte stream; `line` and `column`
/// are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at line {line}, column {column} (byte {offset}): {kind}")]
pub struct ParseError {
    pub kind:   ParseErrorKind,
    pub offset: u64,
    pub line:   u64,
    pub column: u64,
}

pub type Result<T> = std::result::Result<T, Error>;
