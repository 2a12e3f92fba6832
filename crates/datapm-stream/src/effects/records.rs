use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use crate::core::{RecordExtractor, SelectionPath};
use crate::error::{Error, Result};

/// Per-record hook applied in arrival order. Returning `None` drops the
/// record.
pub type Transform = Box<dyn FnMut(Value) -> Option<Value> + Send>;

type Completion = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Final stage: decoded bytes in, records out.
///
/// Records complete in the bytes received so far are yielded before more
/// input is pulled. A malformed payload yields every record that precedes
/// the fault, then the error, then ends.
pub struct RecordStream<S> {
    inner:     S,
    extractor: RecordExtractor,
    transform: Option<Transform>,
    queue:     VecDeque<Value>,
    error:     Option<Error>,
    done:      bool,
    complete:  Option<Completion>,
}

impl<S> RecordStream<S> {
    pub fn new(inner: S, selection: SelectionPath, transform: Option<Transform>) -> Self {
        Self {
            inner,
            extractor: RecordExtractor::new(selection),
            transform,
            queue: VecDeque::new(),
            error: None,
            done: false,
            complete: None,
        }
    }

    /// Run `task` after the last record has been delivered, provided the
    /// input ended cleanly and the document parsed without error. The
    /// stream ends once `task` finishes. If the stream fails or is dropped
    /// first, `task` is dropped without running.
    pub fn on_complete<F>(mut self, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.complete = Some(Box::pin(task));
        self
    }

    /// Like [`RecordStream::new`], parsing the selection expression first.
    pub fn parse(inner: S, selection: &str, transform: Option<Transform>) -> Result<Self> {
        Ok(Self::new(inner, SelectionPath::parse(selection)?, transform))
    }

    pub fn selection(&self) -> &SelectionPath { self.extractor.selection() }

    /// Decoded bytes consumed by the parser so far.
    pub fn bytes_parsed(&self) -> u64 { self.extractor.offset() }
}

impl<S> Stream for RecordStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    type Item = Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(record) = this.queue.pop_front() {
                match this.transform.as_mut() {
                    Some(transform) => match transform(record) {
                        Some(record) => return Poll::Ready(Some(Ok(record))),
                        None => continue,
                    },
                    None => return Poll::Ready(Some(Ok(record))),
                }
            }

            if let Some(err) = this.error.take() {
                return Poll::Ready(Some(Err(err)));
            }
            if this.done {
                if let Some(task) = this.complete.as_mut() {
                    ready!(task.as_mut().poll(cx));
                    this.complete = None;
                }
                return Poll::Ready(None);
            }

            let queue = &mut this.queue;
            let mut emit = |record| queue.push_back(record);
            let outcome = match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => this.extractor.feed(&chunk, &mut emit).map_err(Error::from),
                Some(Err(err)) => Err(err),
                None => {
                    this.done = true;
                    this.extractor.finish(&mut emit).map_err(Error::from)
                }
            };

            if let Err(err) = outcome {
                tracing::debug!(error = %err, offset = this.extractor.offset(), "record stream failed");
                this.error = Some(err);
                this.done = true;
                this.complete = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;
    use futures_util::{TryStreamExt, stream};
    use serde_json::json;
    use std::io;

    fn chunks(input: &'static [u8], size: usize) -> impl Stream<Item = Result<Bytes>> + Unpin {
        stream::iter(
            input
                .chunks(size)
                .map(|c| Ok(Bytes::from_static(c)))
                .collect::<Vec<_>>(),
        )
    }

    async fn drain<S>(mut records: RecordStream<S>) -> (Vec<Value>, Option<Error>)
    where
        S: Stream<Item = Result<Bytes>> + Unpin,
    {
        let mut values = Vec::new();
        while let Some(item) = records.next().await {
            match item {
                Ok(value) => values.push(value),
                Err(err) => {
                    assert!(records.next().await.is_none());
                    return (values, Some(err));
                }
            }
        }
        (values, None)
    }

    #[tokio::test]
    async fn test_records_across_chunk_boundaries() {
        let input = br#"{"records": [{"id": 1}, {"id": 2}, {"id": 3}]}"#;
        let records = RecordStream::parse(chunks(input, 4), "records.*", None).unwrap();
        let values: Vec<Value> = records.try_collect().await.unwrap();
        assert_eq!(values, vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);
    }

    #[tokio::test]
    async fn test_transform_and_filter() {
        let input = br#"[1, 2, 3, 4, 5, 6]"#;
        let transform: Transform = Box::new(|value| {
            let n = value.as_i64()?;
            (n % 2 == 0).then(|| json!(n * 10))
        });
        let records = RecordStream::parse(chunks(input, 3), "$[*]", Some(transform)).unwrap();
        let values: Vec<Value> = records.try_collect().await.unwrap();
        assert_eq!(values, vec![json!(20), json!(40), json!(60)]);
    }

    #[tokio::test]
    async fn test_records_before_error_are_delivered() {
        let input = br#"{"records": [{"id": 1}, {"id": 2}, {"id": 3}, {"id": x}]}"#;
        let records = RecordStream::parse(chunks(input, 7), "records.*", None).unwrap();
        let (values, err) = drain(records).await;

        assert_eq!(values.len(), 3);
        match err {
            Some(Error::Parse(err)) => assert_eq!(err.kind, ParseErrorKind::UnexpectedByte(b'x')),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_truncated_input() {
        let records = RecordStream::parse(chunks(br#"[{"a": 1}, {"a""#, 5), "[*]", None).unwrap();
        let (values, err) = drain(records).await;

        assert_eq!(values, vec![json!({"a": 1})]);
        assert!(matches!(
            err,
            Some(Error::Parse(ref e)) if e.kind == ParseErrorKind::UnexpectedEof
        ));
    }

    #[tokio::test]
    async fn test_upstream_error_ends_stream() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"[1, 2, ")),
            Err(Error::SourceRead(io::Error::other("reset"))),
            Ok(Bytes::from_static(b"3]")),
        ]);
        let records = RecordStream::parse(source, "[*]", None).unwrap();
        let (values, err) = drain(records).await;

        assert_eq!(values, vec![json!(1), json!(2)]);
        assert!(matches!(err, Some(Error::SourceRead(_))));
    }

    #[tokio::test]
    async fn test_completion_runs_only_after_clean_end() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let records = RecordStream::parse(chunks(b"[1, 2]", 2), "[*]", None)
            .unwrap()
            .on_complete(async move { flag.store(true, Ordering::SeqCst) });
        let values: Vec<Value> = records.try_collect().await.unwrap();
        assert_eq!(values, vec![json!(1), json!(2)]);
        assert!(ran.load(Ordering::SeqCst));

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let records = RecordStream::parse(chunks(b"[1, 2", 2), "[*]", None)
            .unwrap()
            .on_complete(async move { flag.store(true, Ordering::SeqCst) });
        let (values, err) = drain(records).await;
        assert_eq!(values, vec![json!(1), json!(2)]);
        assert!(matches!(err, Some(Error::Parse(_))));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_invalid_selection() {
        let result = RecordStream::parse(chunks(b"[]", 1), "records..id", None);
        assert!(matches!(result, Err(Error::InvalidSelectionPath { .. })));
    }
}
