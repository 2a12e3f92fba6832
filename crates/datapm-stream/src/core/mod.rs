//! Pure transformations.
//!
//! Path resolution, magic-byte detection, selection paths and the
//! incremental JSON record extractor. None of these touch the filesystem or
//! the network; the effects layer drives them.

mod detect;
mod json;
mod path;
mod selection;

pub use detect::{detect_compression, MAX_MAGIC_LEN};
pub use json::RecordExtractor;
pub use path::{resolve, LOCAL_NAMESPACE};
pub use selection::{Segment, SelectionPath};
