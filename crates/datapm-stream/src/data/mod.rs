//! Immutable data types for ingestion.
//!
//! Identities, the cache root, compression formats and pipeline options.
//! Nothing in here performs I/O except [`CacheRoot::from_home`].

pub mod format;
pub mod identity;
pub mod options;

pub use format::Compression;
pub use identity::{CacheRoot, StreamIdentity};
pub use options::{CompressionMode, EventCallback, IngestEvent, IngestOptions};
