//! The outbound half of a handler: [`ResponseWriter`].
//!
//! A handler sets headers, commits a status with
//! [`write_head`](ResponseWriter::write_head) and streams the body with
//! `tokio::io::AsyncWriteExt`. Writing body bytes without a prior
//! `write_head` commits `200 OK`, the same rule every HTTP/1.1 server uses.

use std::any::Any;
use std::borrow::Cow;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::{HeaderMap, StatusCode};
use tokio::io::AsyncWrite;
use tracing::warn;

use crate::metrics::CustomMetrics;

/// Sink for one HTTP response.
///
/// Only the first `write_head` call, or the first body write, decides the
/// status the client sees. Header changes after that point are not sent.
pub trait ResponseWriter: AsyncWrite + Send + Unpin {
    fn headers(&self) -> &HeaderMap;
    fn headers_mut(&mut self) -> &mut HeaderMap;
    fn write_head(&mut self, status: StatusCode);

    /// The request-scoped custom metric store, if this writer is being
    /// observed by a [`Collector`](crate::Collector).
    fn custom_metrics(&mut self) -> Option<&mut CustomMetrics> {
        None
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for &mut W {
    fn headers(&self) -> &HeaderMap { (**self).headers() }
    fn headers_mut(&mut self) -> &mut HeaderMap { (**self).headers_mut() }
    fn write_head(&mut self, status: StatusCode) { (**self).write_head(status) }

    fn custom_metrics(&mut self) -> Option<&mut CustomMetrics> {
        (**self).custom_metrics()
    }
}

/// Records a custom metric on `w`.
///
/// Returns `false`, and drops the value, when the writer is not observed by a
/// collector, so handlers can call this unconditionally.
pub fn set_custom_metric<W, T>(w: &mut W, key: impl Into<Cow<'static, str>>, value: T) -> bool
where
    W: ResponseWriter + ?Sized,
    T: Any + Send + Sync,
{
    match w.custom_metrics() {
        Some(store) => {
            store.set(key, value);
            true
        }
        None => false,
    }
}

/// Reads back a custom metric previously set on `w`.
pub fn custom_metric<'w, W, T>(w: &'w mut W, key: &str) -> Option<&'w T>
where
    W: ResponseWriter + ?Sized,
    T: Any,
{
    w.custom_metrics()?.get(key)
}

// ── ResponseBuffer ────────────────────────────────────────────────────────────

/// A [`ResponseWriter`] that keeps the whole response in memory.
///
/// Follows transport rules (first status wins, body writes commit `200 OK`),
/// which makes it the writer of choice for exercising handlers in tests.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed status; `200 OK` if nothing was committed.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn body(&self) -> &[u8] { &self.body }

    pub fn into_body(self) -> Vec<u8> { self.body }
}

impl ResponseWriter for ResponseBuffer {
    fn headers(&self) -> &HeaderMap { &self.headers }
    fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    fn write_head(&mut self, status: StatusCode) {
        match self.status {
            None => self.status = Some(status),
            Some(committed) => warn!(%committed, ignored = %status, "superfluous write_head call"),
        }
    }
}

impl AsyncWrite for ResponseBuffer {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
