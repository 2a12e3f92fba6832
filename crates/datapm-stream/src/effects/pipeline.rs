use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::{SelectionPath, detect_compression};
use crate::data::{CacheRoot, Compression, CompressionMode, IngestEvent, IngestOptions, StreamIdentity};
use crate::effects::cache::{CacheLookup, CacheStage};
use crate::effects::decompress::Decompressor;
use crate::effects::peek::peek;
use crate::effects::records::{RecordStream, Transform};
use crate::effects::source::{ByteSource, ByteStream};
use crate::error::Result;

/// Assembles the stages for one cache entry:
/// source, sniffer, decompressor, cache, parser.
///
/// The cache is consulted before the source is opened, so a hit never
/// touches the transport. Entries hold the decoded payload.
#[derive(Debug, Clone)]
pub struct Ingest {
    path:    PathBuf,
    options: IngestOptions,
}

impl Ingest {
    pub fn new(root: &CacheRoot, identity: &StreamIdentity, options: IngestOptions) -> Self {
        Self::at(identity.cache_path(root), options)
    }

    /// Use an explicit entry path instead of the resolved one.
    pub fn at(path: impl Into<PathBuf>, options: IngestOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }

    pub fn cache_path(&self) -> &Path { &self.path }

    pub fn options(&self) -> &IngestOptions { &self.options }

    /// The cache stage for this entry, for eviction or inspection.
    pub fn cache(&self) -> CacheStage { CacheStage::new(&self.path, self.options.clone()) }

    /// Decoded payload bytes, from the cache when a complete entry exists.
    ///
    /// On a miss the entry is promoted as soon as the decoded stream ends
    /// cleanly.
    pub async fn bytes<B: ByteSource>(&self, source: &B) -> Result<ByteStream> {
        if !self.options.cache {
            return self.decoded(source).await;
        }

        match self.cache().lookup().await {
            CacheLookup::Hit(cached) => Ok(cached),
            CacheLookup::Miss(miss) => {
                let decoded = self.decoded(source).await?;
                Ok(miss.tee(decoded).await)
            }
        }
    }

    /// Records matched by `selection`, in document order.
    ///
    /// The selection is validated before anything is opened. On a miss the
    /// entry is only promoted once the whole document has parsed, so a
    /// payload that ends mid-document is never cached.
    pub async fn records<B: ByteSource>(
        &self,
        source: &B,
        selection: &str,
        transform: Option<Transform>,
    ) -> Result<RecordStream<ByteStream>> {
        let selection = SelectionPath::parse(selection)?;
        if !self.options.cache {
            let bytes = self.decoded(source).await?;
            return Ok(RecordStream::new(bytes, selection, transform));
        }

        match self.cache().lookup().await {
            CacheLookup::Hit(cached) => Ok(RecordStream::new(cached, selection, transform)),
            CacheLookup::Miss(miss) => {
                let decoded = self.decoded(source).await?;
                let (bytes, gate) = miss.tee_deferred(decoded).await;
                Ok(RecordStream::new(bytes, selection, transform).on_complete(async move {
                    gate.commit().await;
                }))
            }
        }
    }

    async fn decoded<B: ByteSource>(&self, source: &B) -> Result<ByteStream> {
        let raw = source.open().await?;

        match self.options.compression {
            CompressionMode::Disabled => Ok(raw),
            CompressionMode::Force(format) => self.decompress(raw, format),
            CompressionMode::Detect => {
                let peeked = peek(raw, self.options.peek_size).await?;
                let compression = detect_compression(&peeked.bytes);
                debug!(
                    path = %self.path.display(),
                    format = compression.map_or("none", Compression::as_str),
                    "sniffed source"
                );
                self.options.emit(IngestEvent::FormatDetected { compression });

                match compression {
                    Some(format) => self.decompress(Box::pin(peeked.stream), format),
                    None => Ok(Box::pin(peeked.stream)),
                }
            }
        }
    }

    fn decompress(&self, raw: ByteStream, format: Compression) -> Result<ByteStream> {
        let stage = Decompressor::new(raw, format, self.options.decompress_slice)?;
        Ok(Box::pin(stage))
    }
}
