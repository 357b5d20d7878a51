//! Capturing decorator for the outbound response.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use http::{HeaderMap, StatusCode};
use tokio::io::AsyncWrite;

use crate::capture::BoundedCapture;
use crate::metrics::{CustomMetrics, MetricsResponse};
use crate::response::ResponseWriter;

/// Wraps a [`ResponseWriter`] and observes what the handler sends through it.
///
/// Every call is forwarded to the wrapped writer as-is; the decorator only
/// watches. It records the first status, counts written bytes, optionally
/// keeps a bounded copy of the body and hosts the request's
/// [`CustomMetrics`].
pub struct CapturingResponseWriter<W> {
    inner: W,
    status: Option<StatusCode>,
    written: u64,
    body: Option<BoundedCapture>,
    custom: CustomMetrics,
}

impl<W: ResponseWriter> CapturingResponseWriter<W> {
    /// A `limit` of `0` disables body capture; counting stays on.
    pub fn new(inner: W, limit: usize) -> Self {
        Self {
            inner,
            status: None,
            written: 0,
            body: (limit > 0).then(|| BoundedCapture::new(limit)),
            custom: CustomMetrics::new(),
        }
    }

    /// Status of the first status-setting call, if any happened yet.
    pub fn status(&self) -> Option<StatusCode> { self.status }

    pub fn written(&self) -> u64 { self.written }

    pub fn captured(&self) -> &[u8] {
        self.body.as_ref().map(BoundedCapture::as_bytes).unwrap_or_default()
    }

    /// Freezes the observed state into the response half of a record.
    ///
    /// A handler that never committed a status is reported as `200 OK`, which
    /// is what the transport sends in that case.
    pub(crate) fn finish(self) -> (MetricsResponse, CustomMetrics) {
        let response = MetricsResponse {
            status: self.status.unwrap_or(StatusCode::OK),
            headers: self.inner.headers().clone(),
            body: self.body.map(BoundedCapture::into_bytes).unwrap_or_default(),
            written_body_bytes: self.written,
        };
        (response, self.custom)
    }
}

impl<W: ResponseWriter> ResponseWriter for CapturingResponseWriter<W> {
    fn headers(&self) -> &HeaderMap { self.inner.headers() }
    fn headers_mut(&mut self) -> &mut HeaderMap { self.inner.headers_mut() }

    fn write_head(&mut self, status: StatusCode) {
        self.status.get_or_insert(status);
        self.inner.write_head(status);
    }

    fn custom_metrics(&mut self) -> Option<&mut CustomMetrics> {
        Some(&mut self.custom)
    }
}

impl<W: ResponseWriter> AsyncWrite for CapturingResponseWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        // a body write implicitly commits 200 OK
        this.status.get_or_insert(StatusCode::OK);

        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        this.written += n as u64;
        if let Some(body) = &mut this.body {
            body.append(&buf[..n]);
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{ResponseBuffer, custom_metric, set_custom_metric};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn captures_prefix_and_counts_everything() {
        let mut buffer = ResponseBuffer::new();
        let mut w = CapturingResponseWriter::new(&mut buffer, 5);
        w.write_all(b"Hello").await.unwrap();
        w.write_all(b"World").await.unwrap();

        let (response, _) = w.finish();
        assert_eq!(response.body(), "Hello");
        assert_eq!(response.written_body_bytes(), 10);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(buffer.body(), b"HelloWorld");
    }

    #[tokio::test]
    async fn zero_limit_still_counts() {
        let mut buffer = ResponseBuffer::new();
        let mut w = CapturingResponseWriter::new(&mut buffer, 0);
        w.write_all(&[7u8; 300]).await.unwrap();

        assert!(w.captured().is_empty());
        let (response, _) = w.finish();
        assert!(response.body().is_empty());
        assert_eq!(response.written_body_bytes(), 300);
        assert_eq!(buffer.body().len(), 300);
    }

    #[tokio::test]
    async fn first_status_is_recorded_and_all_are_forwarded() {
        let mut buffer = ResponseBuffer::new();
        let mut w = CapturingResponseWriter::new(&mut buffer, 0);
        w.headers_mut().insert("x-custom-header", "VALUE".parse().unwrap());
        w.write_head(StatusCode::CREATED);
        w.write_head(StatusCode::INTERNAL_SERVER_ERROR);

        let (response, _) = w.finish();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-custom-header"], "VALUE");
        assert_eq!(buffer.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn write_before_head_records_ok() {
        let mut buffer = ResponseBuffer::new();
        let mut w = CapturingResponseWriter::new(&mut buffer, 16);
        w.write_all(b"x").await.unwrap();
        w.write_head(StatusCode::NOT_FOUND);
        assert_eq!(w.status(), Some(StatusCode::OK));
    }

    /// Accepts headers but refuses every body write.
    #[derive(Default)]
    struct Disconnected {
        headers: HeaderMap,
    }

    impl ResponseWriter for Disconnected {
        fn headers(&self) -> &HeaderMap { &self.headers }
        fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
        fn write_head(&mut self, _status: StatusCode) {}
    }

    impl AsyncWrite for Disconnected {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn write_errors_pass_through_uncounted() {
        let mut w = CapturingResponseWriter::new(Disconnected::default(), 16);
        let err = w.write_all(b"Hello").await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(w.written(), 0);
        assert!(w.captured().is_empty());
    }

    #[test]
    fn hosts_custom_metrics() {
        let mut buffer = ResponseBuffer::new();
        let mut w = CapturingResponseWriter::new(&mut buffer, 0);
        assert!(set_custom_metric(&mut w, "CustomMetric1", "Hello World"));
        assert!(set_custom_metric(&mut w, "CustomMetric2", 10));
        assert_eq!(custom_metric::<_, i32>(&mut w, "CustomMetric2"), Some(&10));

        let (_, custom) = w.finish();
        assert_eq!(custom.get::<&str>("CustomMetric1"), Some(&"Hello World"));
        assert_eq!(custom.get::<i32>("CustomMetric2"), Some(&10));
    }
}
