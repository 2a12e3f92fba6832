use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use flate2::write::MultiGzDecoder;
use futures_util::{Stream, StreamExt};

use crate::data::Compression;
use crate::error::{Error, Result};

/// Output buffer size for the decoders driven step by step.
#[cfg(any(feature = "zstd", feature = "xz"))]
const SCRATCH_LEN: usize = 32 * 1024;

/// Push-style decoders writing into an in-memory buffer that is drained
/// after every step.
enum Decoder {
    Gzip(MultiGzDecoder<Vec<u8>>),
    #[cfg(feature = "zstd")]
    Zstd(ZstdDecoder),
    #[cfg(feature = "xz")]
    Xz(XzDecoder),
}

impl Decoder {
    fn new(format: Compression) -> Result<Self> {
        let decoder = match format {
            Compression::Gzip => Ok(Self::Gzip(MultiGzDecoder::new(Vec::new()))),
            #[cfg(feature = "zstd")]
            Compression::Zstd => ZstdDecoder::new().map(Self::Zstd),
            #[cfg(feature = "xz")]
            Compression::Xz => XzDecoder::new().map(Self::Xz),
            other => return Err(Error::UnsupportedCompression(other)),
        };
        decoder.map_err(|source| Error::Decompression { format, source })
    }

    /// Decode `input`, leaving all output it produces in the buffer.
    fn write(&mut self, input: &[u8]) -> io::Result<()> {
        match self {
            Self::Gzip(d) => {
                d.write_all(input)?;
                d.flush()
            }
            #[cfg(feature = "zstd")]
            Self::Zstd(d) => d.write(input),
            #[cfg(feature = "xz")]
            Self::Xz(d) => d.write(input),
        }
    }

    /// Signal end of input. Fails if the payload stops inside a member,
    /// frame or stream.
    fn finish(&mut self) -> io::Result<()> {
        match self {
            Self::Gzip(d) => d.try_finish(),
            #[cfg(feature = "zstd")]
            Self::Zstd(d) => d.finish(),
            #[cfg(feature = "xz")]
            Self::Xz(d) => d.finish(),
        }
    }

    fn take_output(&mut self) -> Vec<u8> {
        match self {
            Self::Gzip(d) => std::mem::take(d.get_mut()),
            #[cfg(feature = "zstd")]
            Self::Zstd(d) => std::mem::take(&mut d.output),
            #[cfg(feature = "xz")]
            Self::Xz(d) => std::mem::take(&mut d.output),
        }
    }
}

/// zstd frames decoded through the raw streaming API, tracking whether the
/// last frame was completed.
#[cfg(feature = "zstd")]
struct ZstdDecoder {
    raw:        zstd::stream::raw::Decoder<'static>,
    scratch:    Box<[u8]>,
    output:     Vec<u8>,
    frame_open: bool,
}

#[cfg(feature = "zstd")]
impl ZstdDecoder {
    fn new() -> io::Result<Self> {
        Ok(Self {
            raw:        zstd::stream::raw::Decoder::new()?,
            scratch:    vec![0; SCRATCH_LEN].into_boxed_slice(),
            output:     Vec::new(),
            frame_open: false,
        })
    }

    fn write(&mut self, input: &[u8]) -> io::Result<()> {
        use zstd::stream::raw::{InBuffer, Operation, OutBuffer};

        let mut src = InBuffer::around(input);
        loop {
            let (hint, produced) = {
                let mut dst = OutBuffer::around(&mut self.scratch[..]);
                let hint = self.raw.run(&mut src, &mut dst)?;
                (hint, dst.pos())
            };
            self.output.extend_from_slice(&self.scratch[..produced]);
            // 0 once a frame is fully decoded and flushed.
            self.frame_open = hint != 0;
            if src.pos() == input.len() && produced < self.scratch.len() {
                return Ok(());
            }
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.frame_open {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "zstd frame is truncated"));
        }
        Ok(())
    }
}

/// xz streams (concatenated streams allowed) decoded through liblzma
/// directly, so end of input can be checked without consuming the decoder.
#[cfg(feature = "xz")]
struct XzDecoder {
    stream:  xz2::stream::Stream,
    scratch: Box<[u8]>,
    output:  Vec<u8>,
}

#[cfg(feature = "xz")]
impl XzDecoder {
    fn new() -> io::Result<Self> {
        Ok(Self {
            stream:  xz2::stream::Stream::new_stream_decoder(u64::MAX, xz2::stream::CONCATENATED)?,
            scratch: vec![0; SCRATCH_LEN].into_boxed_slice(),
            output:  Vec::new(),
        })
    }

    /// Run the decoder over `input` until it is consumed and no more output
    /// is pending, or until the decoder stops making progress.
    fn process(&mut self, mut input: &[u8], action: xz2::stream::Action) -> io::Result<xz2::stream::Status> {
        loop {
            let (read_before, written_before) = (self.stream.total_in(), self.stream.total_out());
            let status = self.stream.process(input, &mut self.scratch, action)?;
            let read = (self.stream.total_in() - read_before) as usize;
            let produced = (self.stream.total_out() - written_before) as usize;
            self.output.extend_from_slice(&self.scratch[..produced]);
            input = &input[read..];

            if matches!(status, xz2::stream::Status::StreamEnd) {
                return Ok(status);
            }
            if read == 0 && produced == 0 {
                if !input.is_empty() {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "xz decoder stalled"));
                }
                return Ok(status);
            }
            if input.is_empty() && produced < self.scratch.len() && matches!(action, xz2::stream::Action::Run) {
                return Ok(status);
            }
        }
    }

    fn write(&mut self, input: &[u8]) -> io::Result<()> {
        self.process(input, xz2::stream::Action::Run).map(drop)
    }

    fn finish(&mut self) -> io::Result<()> {
        match self.process(&[], xz2::stream::Action::Finish)? {
            xz2::stream::Status::StreamEnd => Ok(()),
            _ => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "xz stream is truncated")),
        }
    }
}

/// Decompressing stage.
///
/// Compressed chunks are fed to the decoder at most `slice` bytes at a time
/// and whatever that produces is yielded before more input is consumed.
/// Upstream is only polled once the current chunk is fully decoded, so a
/// slow consumer stalls the source instead of growing a buffer.
pub struct Decompressor<S> {
    inner:   S,
    format:  Compression,
    decoder: Decoder,
    pending: Bytes,
    slice:   usize,
    done:    bool,
}

impl<S> Decompressor<S> {
    /// Fails with [`Error::UnsupportedCompression`] when this build has no
    /// decoder for `format`.
    pub fn new(inner: S, format: Compression, slice: usize) -> Result<Self> {
        Ok(Self {
            inner,
            format,
            decoder: Decoder::new(format)?,
            pending: Bytes::new(),
            slice: slice.max(1),
            done: false,
        })
    }

    pub fn format(&self) -> Compression { self.format }

    fn fail(&mut self, source: io::Error) -> Poll<Option<Result<Bytes>>> {
        self.done = true;
        tracing::debug!(format = %self.format, error = %source, "decompression failed");
        Poll::Ready(Some(Err(Error::Decompression {
            format: self.format,
            source,
        })))
    }
}

impl<S> Stream for Decompressor<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            if !this.pending.is_empty() {
                let take = this.pending.len().min(this.slice);
                let input = this.pending.split_to(take);
                if let Err(source) = this.decoder.write(&input) {
                    return this.fail(source);
                }
                let output = this.decoder.take_output();
                if !output.is_empty() {
                    return Poll::Ready(Some(Ok(Bytes::from(output))));
                }
                continue;
            }

            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => this.pending = chunk,
                Some(Err(err)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    if let Err(source) = this.decoder.finish() {
                        return this.fail(source);
                    }
                    this.done = true;
                    let output = this.decoder.take_output();
                    if !output.is_empty() {
                        return Poll::Ready(Some(Ok(Bytes::from(output))));
                    }
                }
            }
        }
    }
}
