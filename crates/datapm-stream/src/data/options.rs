use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use datapm_fs::StagingOptions;

use super::format::Compression;
use crate::error::Error;

/// Bytes peeked from the head of a source for format detection.
pub const DEFAULT_PEEK_SIZE: usize = 512;

/// Chunk size used when streaming from local files, cache hits included.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Compressed bytes fed to a decoder per step.
pub const DEFAULT_DECOMPRESS_SLICE: usize = 8 * 1024;

/// Observable milestones of one ingestion.
#[derive(Debug)]
pub enum IngestEvent {
    /// The sniffer inspected the head of the source. `None` means the
    /// payload is passed through undecoded.
    FormatDetected { compression: Option<Compression> },

    /// A complete entry was found; the source will not be opened.
    CacheHit { path: PathBuf },

    /// No complete entry; bytes are written through to a staging file.
    CacheMiss { path: PathBuf },

    /// The staging file was promoted to a complete entry.
    CachePromoted { path: PathBuf, bytes: u64 },

    /// Caching failed and the stage fell back to pass-through. The data
    /// delivered to the consumer is unaffected.
    CacheDegraded { path: PathBuf, error: Error },
}

pub type EventCallback = Arc<dyn Fn(&IngestEvent) + Send + Sync>;

/// How the decompressor stage is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMode {
    /// Sniff the head of the source.
    #[default]
    Detect,

    /// Skip sniffing and decode with the given format.
    Force(Compression),

    /// Treat the source as uncompressed.
    Disabled,
}

/// Configuration for an ingestion pipeline.
///
/// # Examples
///
/// ```
/// use datapm_stream::{CompressionMode, IngestOptions};
///
/// let options = IngestOptions::default()
///     .peek_size(16)
///     .compression(CompressionMode::Detect)
///     .cache(true);
/// ```
#[derive(Clone)]
pub struct IngestOptions {
    /// Bytes peeked for format detection. Always at least 1.
    ///
    /// Default: 512
    pub peek_size: usize,

    /// Read size for file-backed streams.
    ///
    /// Default: 64 KiB
    pub read_chunk_size: usize,

    /// Upper bound on compressed bytes handed to the decoder at once. Keeps
    /// the decompressed output buffered per step proportional to this value
    /// instead of to the transport's chunk size.
    ///
    /// Default: 8 KiB
    pub decompress_slice: usize,

    /// Default: [`CompressionMode::Detect`]
    pub compression: CompressionMode,

    /// Write-through caching. When off, the cache path is neither read nor
    /// written.
    ///
    /// Default: true
    pub cache: bool,

    /// Options for staging files of cache misses.
    pub staging: StagingOptions,

    /// Invoked for each [`IngestEvent`].
    ///
    /// Default: None
    pub on_event: Option<EventCallback>,
}

impl fmt::Debug for IngestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestOptions")
            .field("peek_size", &self.peek_size)
            .field("read_chunk_size", &self.read_chunk_size)
            .field("decompress_slice", &self.decompress_slice)
            .field("compression", &self.compression)
            .field("cache", &self.cache)
            .field("staging", &self.staging)
            .field("on_event", &self.on_event.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            peek_size:        DEFAULT_PEEK_SIZE,
            read_chunk_size:  DEFAULT_READ_CHUNK_SIZE,
            decompress_slice: DEFAULT_DECOMPRESS_SLICE,
            compression:      CompressionMode::default(),
            cache:            true,
            staging:          StagingOptions::default(),
            on_event:         None,
        }
    }
}

impl IngestOptions {
    pub fn peek_size(mut self, size: usize) -> Self {
        self.peek_size = size.max(1);
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    pub fn decompress_slice(mut self, size: usize) -> Self {
        self.decompress_slice = size.max(1);
        self
    }

    pub fn compression(mut self, mode: CompressionMode) -> Self {
        self.compression = mode;
        self
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }

    pub fn staging(mut self, staging: StagingOptions) -> Self {
        self.staging = staging;
        self
    }

    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(&IngestEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(callback));
        self
    }

    pub(crate) fn emit(&self, event: IngestEvent) {
        if let Some(ref callback) = self.on_event {
            callback(&event);
        }
    }
}
