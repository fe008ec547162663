use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use super::backend::ByteProgress;

pin_project! {
    /// Wraps a body stream and reports the running byte count after every
    /// chunk that passes through.
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        progress: ByteProgress,
        bytes_sent: u64,
        total_bytes: u64,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, total_bytes: u64, progress: ByteProgress) -> Self {
        Self {
            inner,
            progress,
            bytes_sent: 0,
            total_bytes,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_sent += chunk.len() as u64;
                    this.progress.report(*this.bytes_sent, *this.total_bytes);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
