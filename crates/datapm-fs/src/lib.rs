//! Staged writes with atomic promotion for on-disk caches.
//!
//! A cache entry is written through a [`StagedFile`] that lives beside its
//! destination under a hidden `.<name>.<random>.tmp` name. Only
//! [`StagedFile::commit`] renames it into place, so a path either holds a
//! complete entry or nothing at all. Dropping an uncommitted staged file
//! removes it; files orphaned by a crash are never promoted and can be
//! collected with [`sweep_stale`].

mod entry;
mod error;
mod staging;

pub use entry::{open_complete, remove_entry, sweep_stale};
pub use error::{Error, Result};
pub use staging::{is_staging_name, StagedFile, StagingOptions, STAGING_SUFFIX};
