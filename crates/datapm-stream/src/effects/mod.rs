//! I/O stages of the ingestion pipeline.
//!
//! Every stage is a pull-based [`Stream`](futures_util::Stream) over
//! `Result<Bytes>` chunks (or records, for the last one). A stage only
//! polls its upstream when its consumer asks for more and it has nothing
//! buffered, so backpressure and cancellation follow from ordinary stream
//! polling and dropping.

mod cache;
mod decompress;
mod peek;
mod pipeline;
mod records;
mod source;

pub use cache::{CacheLookup, CacheMiss, CacheStage, CommitGate};
pub use decompress::Decompressor;
pub use peek::{peek, Peeked, Replay};
pub use pipeline::Ingest;
pub use records::{RecordStream, Transform};
pub use source::{BoxStream, ByteSource, ByteStream, FileSource};

#[cfg(feature = "reqwest")]
pub use source::ReqwestSource;

pub(crate) use source::read_stream;
