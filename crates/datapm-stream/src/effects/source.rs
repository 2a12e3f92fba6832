use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, stream};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::data::options::DEFAULT_READ_CHUNK_SIZE;
use crate::error::{Error, Result};

/// A boxed stream, as handed between pipeline stages.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Ordered chunks of bytes ending in either exhaustion or an error.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Supplier of the raw payload.
///
/// Opening is deferred until the pipeline knows it needs the bytes, so a
/// cache hit never touches the transport. Implementations map their own
/// failures to [`Error::SourceRead`].
pub trait ByteSource: Send + Sync {
    fn open(&self) -> impl Future<Output = Result<ByteStream>> + Send;
}

/// A payload stored in a local file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path:       PathBuf,
    chunk_size: usize,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path:       path.into(),
            chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl ByteSource for FileSource {
    async fn open(&self) -> Result<ByteStream> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(Error::SourceRead)?;
        tracing::debug!(path = %self.path.display(), "opened file source");
        Ok(read_stream(file, self.chunk_size))
    }
}

/// Stream an async reader in chunks of at most `chunk_size` bytes.
pub(crate) fn read_stream<R>(reader: R, chunk_size: usize) -> ByteStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    Box::pin(stream::try_unfold(reader, move |mut reader| async move {
        let mut buf = BytesMut::with_capacity(chunk_size);
        let n = reader.read_buf(&mut buf).await.map_err(Error::SourceRead)?;
        if n > 0 {
            tracing::trace!(bytes = n, "read chunk");
        }
        Ok::<_, Error>((n > 0).then(|| (buf.freeze(), reader)))
    }))
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use std::io;

    use futures_util::StreamExt;

    use super::*;

    /// HTTP GET response body as a source.
    pub struct ReqwestSource {
        client: reqwest::Client,
        url:    String,
    }

    impl ReqwestSource {
        pub fn new(url: impl Into<String>) -> Self {
            Self::with_client(reqwest::Client::new(), url)
        }

        pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
            Self {
                client,
                url: url.into(),
            }
        }
    }

    fn source_error(e: reqwest::Error) -> Error { Error::SourceRead(io::Error::other(e)) }

    impl ByteSource for ReqwestSource {
        async fn open(&self) -> Result<ByteStream> {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(source_error)?;
            tracing::debug!(url = %self.url, status = %response.status(), "opened http source");
            Ok(Box::pin(
                response.bytes_stream().map(|chunk| chunk.map_err(source_error)),
            ))
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestSource;
