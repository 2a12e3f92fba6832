//! Streaming ingestion of package data with a write-through local cache.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - `data` - Identities, formats and options
//! - `core` - Pure transformations: path resolution, magic-byte detection,
//!   selection paths and the incremental record extractor
//! - `effects` - Pipeline stages over async byte streams
//!
//! # Pipeline
//!
//! ```text
//! ByteSource -> peek/detect -> Decompressor -> CacheMiss::tee -> RecordStream
//!                      (CacheLookup::Hit short-circuits everything left of the parser)
//! ```
//!
//! - **Pull-Based**: every stage only reads upstream when asked, so memory
//!   stays bounded whatever the payload size
//! - **Atomic Entries**: cache writes go to a staging file promoted with a
//!   rename once the source is exhausted; readers never see partial entries
//! - **Degradable Cache**: cache write failures are reported through
//!   [`IngestEvent::CacheDegraded`] and never interrupt delivery
//!
//! ```no_run
//! use datapm_stream::{CacheRoot, FileSource, Ingest, IngestOptions, StreamIdentity};
//! use futures_util::TryStreamExt;
//!
//! # async fn run() -> datapm_stream::Result<()> {
//! let root = CacheRoot::from_home()?;
//! let identity = StreamIdentity::in_catalog("noaa", "storm-events");
//! let ingest = Ingest::new(&root, &identity, IngestOptions::default());
//!
//! let mut records = ingest
//!     .records(&FileSource::new("storm-events.json.gz"), "records.*", None)
//!     .await?;
//! while let Some(record) = records.try_next().await? {
//!     println!("{record}");
//! }
//! # Ok(())
//! # }
//! ```

mod core;
mod data;
mod effects;
mod error;

pub use crate::core::{
    LOCAL_NAMESPACE, MAX_MAGIC_LEN, RecordExtractor, Segment, SelectionPath, detect_compression, resolve,
};
pub use data::options::{DEFAULT_DECOMPRESS_SLICE, DEFAULT_PEEK_SIZE, DEFAULT_READ_CHUNK_SIZE};
pub use data::{
    CacheRoot, Compression, CompressionMode, EventCallback, IngestEvent, IngestOptions, StreamIdentity,
};
pub use effects::{
    BoxStream, ByteSource, ByteStream, CacheLookup, CacheMiss, CacheStage, CommitGate, Decompressor, FileSource, Ingest,
    Peeked, RecordStream, Replay, Transform, peek,
};

#[cfg(feature = "reqwest")]
pub use effects::ReqwestSource;

pub use datapm_fs::StagingOptions;
pub use error::{Error, ParseError, ParseErrorKind, Result};
