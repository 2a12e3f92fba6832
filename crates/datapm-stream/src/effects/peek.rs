use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use crate::error::Result;

/// The head of a stream together with a stream that still yields all of it.
pub struct Peeked<S> {
    /// At most `size` bytes from the head of the source; fewer only if the
    /// source ended first.
    pub bytes:  Bytes,
    /// Replays every chunk read while peeking, unchanged, then continues
    /// with the source.
    pub stream: Replay<S>,
}

/// Continuation returned by [`peek`].
pub struct Replay<S> {
    replay:    VecDeque<Bytes>,
    inner:     S,
    exhausted: bool,
}

/// Read at least `size` bytes from the head of `stream` without losing them.
///
/// Chunks are buffered as delivered, so the continuation reproduces the
/// original chunk sequence byte for byte. An upstream error while peeking
/// is returned as is and nothing is kept.
pub async fn peek<S>(mut stream: S, size: usize) -> Result<Peeked<S>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let mut replay = VecDeque::new();
    let mut buffered = 0;
    let mut exhausted = false;

    while buffered < size {
        match stream.next().await {
            Some(Ok(chunk)) => {
                buffered += chunk.len();
                replay.push_back(chunk);
            }
            Some(Err(err)) => return Err(err),
            None => {
                exhausted = true;
                break;
            }
        }
    }

    let bytes = head(&replay, size);
    tracing::trace!(peeked = bytes.len(), chunks = replay.len(), exhausted, "peeked source");

    Ok(Peeked {
        bytes,
        stream: Replay {
            replay,
            inner: stream,
            exhausted,
        },
    })
}

fn head(chunks: &VecDeque<Bytes>, size: usize) -> Bytes {
    match chunks.front() {
        Some(first) if first.len() >= size => first.slice(..size),
        _ => {
            let mut head = BytesMut::with_capacity(size);
            for chunk in chunks {
                let take = (size - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
                if head.len() == size {
                    break;
                }
            }
            head.freeze()
        }
    }
}

impl<S> Peeked<S> {
    /// The continuation without the peeked head. `bytes` followed by this
    /// stream is the original stream.
    pub fn into_remainder(self) -> Replay<S> {
        let Self { bytes, mut stream } = self;
        let mut skip = bytes.len();
        while skip > 0 {
            let Some(front) = stream.replay.front_mut() else { break };
            if front.len() <= skip {
                skip -= front.len();
                stream.replay.pop_front();
            } else {
                *front = front.slice(skip..);
                skip = 0;
            }
        }
        stream
    }
}

impl<S> Replay<S> {
    pub fn into_inner(self) -> S { self.inner }
}

impl<S> Stream for Replay<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(chunk) = this.replay.pop_front() {
            return Poll::Ready(Some(Ok(chunk)));
        }
        if this.exhausted {
            return Poll::Ready(None);
        }

        let next = ready!(this.inner.poll_next_unpin(cx));
        if next.is_none() {
            this.exhausted = true;
        }
        Poll::Ready(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use futures_util::{TryStreamExt, stream};
    use proptest::prelude::*;
    use std::io;

    fn chunked(data: &[u8], chunk: usize) -> impl Stream<Item = Result<Bytes>> + Unpin {
        let chunks: Vec<Result<Bytes>> = data
            .chunks(chunk.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(chunks)
    }

    #[tokio::test]
    async fn test_peek_spanning_chunks() {
        let peeked = peek(chunked(b"hello world", 3), 5).await.unwrap();
        assert_eq!(&peeked.bytes[..], b"hello");

        let chunks: Vec<Bytes> = peeked.stream.try_collect().await.unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.concat(), b"hello world");
    }

    #[tokio::test]
    async fn test_peek_within_first_chunk() {
        let peeked = peek(chunked(b"hello world", 64), 2).await.unwrap();
        assert_eq!(&peeked.bytes[..], b"he");
        let all: Vec<Bytes> = peeked.stream.try_collect().await.unwrap();
        assert_eq!(all, vec![Bytes::from_static(b"hello world")]);
    }

    #[tokio::test]
    async fn test_short_source() {
        let peeked = peek(chunked(b"abc", 1), 512).await.unwrap();
        assert_eq!(&peeked.bytes[..], b"abc");
        assert!(peeked.stream.exhausted);

        let all: Vec<Bytes> = peeked.stream.try_collect().await.unwrap();
        assert_eq!(all.concat(), b"abc");
    }

    #[tokio::test]
    async fn test_empty_source() {
        let peeked = peek(chunked(b"", 1), 4).await.unwrap();
        assert!(peeked.bytes.is_empty());
        let all: Vec<Bytes> = peeked.stream.try_collect().await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_error_during_peek() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(Error::SourceRead(io::Error::other("connection reset"))),
        ]);
        let result = peek(source, 8).await;
        assert!(matches!(result, Err(Error::SourceRead(_))));
    }

    #[tokio::test]
    async fn test_error_after_peek_is_forwarded() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"abcd")),
            Err(Error::SourceRead(io::Error::other("connection reset"))),
        ]);
        let mut peeked = peek(source, 2).await.unwrap();
        assert_eq!(&peeked.stream.next().await.unwrap().unwrap()[..], b"abcd");
        assert!(matches!(peeked.stream.next().await, Some(Err(Error::SourceRead(_)))));
    }

    #[tokio::test]
    async fn test_remainder_excludes_head() {
        let peeked = peek(chunked(b"hello world", 3), 5).await.unwrap();
        let head = peeked.bytes.clone();
        let rest: Vec<Bytes> = peeked.into_remainder().try_collect().await.unwrap();

        assert_eq!(&head[..], b"hello");
        assert_eq!(rest.concat(), b" world");
    }

    proptest! {
        #[test]
        fn prop_peek_then_drain_reproduces_source(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            chunk in 1usize..300,
            size in 1usize..600,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (head, drained) = runtime.block_on(async {
                let peeked = peek(chunked(&data, chunk), size).await.unwrap();
                let chunks: Vec<Bytes> = peeked.stream.try_collect().await.unwrap();
                (peeked.bytes, chunks.concat())
            });

            prop_assert_eq!(&head[..], &data[..size.min(data.len())]);
            prop_assert_eq!(drained, data);
        }

        #[test]
        fn prop_head_then_remainder_reproduces_source(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            chunk in 1usize..300,
            size in 1usize..600,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let joined = runtime.block_on(async {
                let peeked = peek(chunked(&data, chunk), size).await.unwrap();
                let mut joined = peeked.bytes.to_vec();
                let rest: Vec<Bytes> = peeked.into_remainder().try_collect().await.unwrap();
                joined.extend(rest.concat());
                joined
            });

            prop_assert_eq!(joined, data);
        }
    }
}
