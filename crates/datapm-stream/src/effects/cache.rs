use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use datapm_fs::StagedFile;
use futures_util::{StreamExt, stream};
use tracing::{debug, warn};

use crate::data::{IngestEvent, IngestOptions};
use crate::effects::{ByteStream, read_stream};
use crate::error::{Error, Result};

/// Write-through cache for one entry path.
#[derive(Debug, Clone)]
pub struct CacheStage {
    path:    PathBuf,
    options: IngestOptions,
}

/// Outcome of [`CacheStage::lookup`].
pub enum CacheLookup {
    /// A complete entry, streamed from disk.
    Hit(ByteStream),
    /// No complete entry. Feed the real source through the miss to fill it.
    Miss(CacheMiss),
}

/// A pending cache fill.
#[derive(Debug)]
pub struct CacheMiss {
    path:    PathBuf,
    options: IngestOptions,
}

impl CacheStage {
    pub fn new(path: impl Into<PathBuf>, options: IngestOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Look for a complete entry.
    ///
    /// Staging files are never considered. A lookup that fails for any
    /// reason other than absence is logged and treated as a miss.
    pub async fn lookup(&self) -> CacheLookup {
        match datapm_fs::open_complete(&self.path).await {
            Ok(Some(file)) => {
                debug!(path = %self.path.display(), "cache hit");
                self.options.emit(IngestEvent::CacheHit {
                    path: self.path.clone(),
                });
                CacheLookup::Hit(read_stream(file, self.options.read_chunk_size))
            }
            Ok(None) => self.miss(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "cache lookup failed, refetching");
                self.miss()
            }
        }
    }

    /// Serve from the cache if possible, otherwise tee `source` into it.
    pub async fn wrap(&self, source: ByteStream) -> ByteStream {
        match self.lookup().await {
            CacheLookup::Hit(cached) => cached,
            CacheLookup::Miss(miss) => miss.tee(source).await,
        }
    }

    /// Remove the complete entry. Returns whether one existed.
    pub async fn evict(&self) -> Result<bool> {
        let removed = datapm_fs::remove_entry(&self.path).await?;
        if removed {
            debug!(path = %self.path.display(), "evicted cache entry");
        }
        Ok(removed)
    }

    fn miss(&self) -> CacheLookup {
        debug!(path = %self.path.display(), "cache miss");
        self.options.emit(IngestEvent::CacheMiss {
            path: self.path.clone(),
        });
        CacheLookup::Miss(CacheMiss {
            path:    self.path.clone(),
            options: self.options.clone(),
        })
    }
}

type Slot = Arc<Mutex<Option<StagedFile>>>;

fn take_slot(slot: &Slot) -> Option<StagedFile> {
    match slot.lock() {
        Ok(mut staged) => staged.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

fn fill_slot(slot: &Slot, staged: StagedFile) {
    match slot.lock() {
        Ok(mut slot) => *slot = Some(staged),
        Err(poisoned) => *poisoned.into_inner() = Some(staged),
    }
}

fn degrade(path: &Path, options: &IngestOptions, err: datapm_fs::Error) {
    warn!(path = %path.display(), error = %err, "cache write failed, continuing without cache");
    options.emit(IngestEvent::CacheDegraded {
        path:  path.to_path_buf(),
        error: Error::CacheWrite(err),
    });
}

async fn promote(staged: StagedFile, path: &Path, options: &IngestOptions) -> bool {
    let bytes = staged.bytes_written();
    match staged.commit().await {
        Ok(promoted) => {
            debug!(path = %promoted.display(), bytes, "cache entry promoted");
            options.emit(IngestEvent::CachePromoted { path: promoted, bytes });
            true
        }
        Err(err) => {
            degrade(path, options, err);
            false
        }
    }
}

/// Promotion of a miss whose payload still has to be confirmed by the
/// consumer.
///
/// The tee parks its staging file here once the source ends cleanly.
/// Dropping the gate without calling [`commit`](Self::commit) discards it.
pub struct CommitGate {
    slot:    Slot,
    path:    PathBuf,
    options: IngestOptions,
}

impl CommitGate {
    /// Promote the parked staging file. Returns whether an entry was
    /// written; `false` if the tee never reached a clean end or caching had
    /// already degraded.
    pub async fn commit(self) -> bool {
        let Some(staged) = take_slot(&self.slot) else {
            return false;
        };
        promote(staged, &self.path, &self.options).await
    }
}

struct Tee {
    source:  ByteStream,
    staged:  Option<StagedFile>,
    gate:    Option<Slot>,
    path:    PathBuf,
    options: IngestOptions,
    done:    bool,
}

impl Tee {
    fn degrade(&mut self, err: datapm_fs::Error) {
        self.staged = None;
        degrade(&self.path, &self.options, err);
    }
}

impl CacheMiss {
    pub fn path(&self) -> &Path { &self.path }

    /// Forward `source` unchanged while copying it into a staging file.
    ///
    /// The staging file is promoted only after `source` ends cleanly. An
    /// upstream error, or dropping the stream before it ends, discards it.
    /// Cache write failures never reach the consumer: the stream keeps
    /// delivering and the entry is simply not written.
    pub async fn tee(self, source: ByteStream) -> ByteStream { self.start(source, None).await }

    /// Like [`tee`](Self::tee), but a clean end of `source` only parks the
    /// staging file in the returned gate. Nothing is promoted until the
    /// gate is committed.
    pub async fn tee_deferred(self, source: ByteStream) -> (ByteStream, CommitGate) {
        let slot: Slot = Arc::new(Mutex::new(None));
        let gate = CommitGate {
            slot:    Arc::clone(&slot),
            path:    self.path.clone(),
            options: self.options.clone(),
        };
        (self.start(source, Some(slot)).await, gate)
    }

    async fn start(self, source: ByteStream, gate: Option<Slot>) -> ByteStream {
        let mut tee = Tee {
            source,
            staged: None,
            gate,
            path: self.path,
            options: self.options,
            done: false,
        };

        match StagedFile::create(&tee.path, tee.options.staging).await {
            Ok(staged) => tee.staged = Some(staged),
            Err(err) => tee.degrade(err),
        }

        Box::pin(stream::unfold(tee, |mut tee| async move {
            if tee.done {
                return None;
            }

            match tee.source.next().await {
                Some(Ok(chunk)) => {
                    if let Some(staged) = tee.staged.as_mut() {
                        if let Err(err) = staged.write(&chunk).await {
                            tee.degrade(err);
                        }
                    }
                    Some((Ok(chunk), tee))
                }
                Some(Err(err)) => {
                    if tee.staged.take().is_some() {
                        debug!(path = %tee.path.display(), "source failed, discarded staging file");
                    }
                    tee.done = true;
                    Some((Err(err), tee))
                }
                None => {
                    if let Some(staged) = tee.staged.take() {
                        match tee.gate.as_ref() {
                            Some(slot) => fill_slot(slot, staged),
                            None => {
                                promote(staged, &tee.path, &tee.options).await;
                            }
                        }
                    }
                    None
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::TryStreamExt;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn source(chunks: &[&'static [u8]]) -> ByteStream {
        let chunks: Vec<Result<Bytes>> = chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
        Box::pin(stream::iter(chunks))
    }

    fn recording() -> (IngestOptions, Arc<Mutex<Vec<&'static str>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let options = IngestOptions::default().on_event(move |event| {
            let name = match event {
                IngestEvent::FormatDetected { .. } => "detected",
                IngestEvent::CacheHit { .. } => "hit",
                IngestEvent::CacheMiss { .. } => "miss",
                IngestEvent::CachePromoted { .. } => "promoted",
                IngestEvent::CacheDegraded { .. } => "degraded",
            };
            sink.lock().unwrap().push(name);
        });
        (options, events)
    }

    fn entries(dir: &Path) -> usize { std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0) }

    #[tokio::test]
    async fn test_miss_then_promote() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("_local").join("pkg");
        let (options, events) = recording();
        let stage = CacheStage::new(&path, options);

        let stream = stage.wrap(source(&[b"hello ", b"world"])).await;
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();

        assert_eq!(chunks.concat(), b"hello world");
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
        assert_eq!(entries(path.parent().unwrap()), 1);
        assert_eq!(*events.lock().unwrap(), ["miss", "promoted"]);
    }

    #[tokio::test]
    async fn test_hit_does_not_consume_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg");
        std::fs::write(&path, b"cached").unwrap();
        let (options, events) = recording();
        let stage = CacheStage::new(&path, options);

        let untouched: ByteStream = Box::pin(stream::iter(vec![Err::<Bytes, _>(Error::SourceRead(
            io::Error::other("source must not be polled"),
        ))]));
        let chunks: Vec<Bytes> = stage.wrap(untouched).await.try_collect().await.unwrap();

        assert_eq!(chunks.concat(), b"cached");
        assert_eq!(*events.lock().unwrap(), ["hit"]);
    }

    #[tokio::test]
    async fn test_dropped_stream_leaves_no_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg");
        let stage = CacheStage::new(&path, IngestOptions::default());

        let mut stream = stage.wrap(source(&[b"one", b"two", b"three"])).await;
        assert_eq!(stream.try_next().await.unwrap().unwrap(), Bytes::from_static(b"one"));
        drop(stream);

        assert!(!path.exists());
        assert_eq!(entries(dir.path()), 0);
        assert!(matches!(stage.lookup().await, CacheLookup::Miss(_)));
    }

    #[tokio::test]
    async fn test_source_error_discards_staging() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg");
        let stage = CacheStage::new(&path, IngestOptions::default());

        let failing: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(Error::SourceRead(io::Error::other("reset"))),
        ]));
        let mut stream = stage.wrap(failing).await;

        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(stream.next().await, Some(Err(Error::SourceRead(_)))));
        assert!(stream.next().await.is_none());
        assert!(!path.exists());
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_unwritable_cache_degrades() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("catalog");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let path = blocker.join("pkg");
        let (options, events) = recording();
        let stage = CacheStage::new(&path, options);

        let chunks: Vec<Bytes> = stage.wrap(source(&[b"still ", b"delivered"])).await.try_collect().await.unwrap();

        assert_eq!(chunks.concat(), b"still delivered");
        assert_eq!(*events.lock().unwrap(), ["miss", "degraded"]);
    }

    #[tokio::test]
    async fn test_deferred_tee_waits_for_commit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg");
        let (options, events) = recording();
        let stage = CacheStage::new(&path, options);

        let CacheLookup::Miss(miss) = stage.lookup().await else {
            panic!("expected a miss");
        };
        let (stream, gate) = miss.tee_deferred(source(&[b"con", b"firmed"])).await;
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();

        assert_eq!(chunks.concat(), b"confirmed");
        assert!(!path.exists());
        assert_eq!(entries(dir.path()), 1);

        assert!(gate.commit().await);
        assert_eq!(std::fs::read(&path).unwrap(), b"confirmed");
        assert_eq!(entries(dir.path()), 1);
        assert_eq!(*events.lock().unwrap(), ["miss", "promoted"]);
    }

    #[tokio::test]
    async fn test_dropped_gate_discards_staging() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg");
        let stage = CacheStage::new(&path, IngestOptions::default());

        let CacheLookup::Miss(miss) = stage.lookup().await else {
            panic!("expected a miss");
        };
        let (stream, gate) = miss.tee_deferred(source(&[b"rejected"])).await;
        let _: Vec<Bytes> = stream.try_collect().await.unwrap();
        drop(gate);

        assert!(!path.exists());
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_gate_before_end_of_source_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg");
        let stage = CacheStage::new(&path, IngestOptions::default());

        let CacheLookup::Miss(miss) = stage.lookup().await else {
            panic!("expected a miss");
        };
        let (mut stream, gate) = miss.tee_deferred(source(&[b"one", b"two"])).await;
        stream.try_next().await.unwrap();

        assert!(!gate.commit().await);
        drop(stream);
        assert!(!path.exists());
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_evict() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pkg");
        std::fs::write(&path, b"cached").unwrap();
        let stage = CacheStage::new(&path, IngestOptions::default());

        assert!(stage.evict().await.unwrap());
        assert!(!stage.evict().await.unwrap());
        assert!(matches!(stage.lookup().await, CacheLookup::Miss(_)));
    }
}
