//! Capturing decorator for the inbound body.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tracing::debug;

use crate::capture::BoundedCapture;

/// Upper bound on the scratch buffer allocated for the unread-body probe.
const PROBE_CHUNK: usize = 8 * 1024;

/// Wraps a request body, counting every byte the handler reads and keeping
/// the first `limit` of them.
///
/// Reads and their errors pass through unchanged. Dropping the reader drops
/// the wrapped stream.
#[derive(Debug)]
pub struct CapturingBodyReader<R> {
    inner: R,
    capture: BoundedCapture,
    consumed: u64,
    probed: bool,
}

impl<R> CapturingBodyReader<R> {
    pub fn new(inner: R, limit: usize) -> Self {
        Self {
            inner,
            capture: BoundedCapture::new(limit),
            consumed: 0,
            probed: false,
        }
    }

    /// Total bytes handed to the reader's caller. Uncapped.
    pub fn consumed(&self) -> u64 { self.consumed }

    /// The bytes captured so far.
    pub fn captured(&self) -> &[u8] { self.capture.as_bytes() }

    pub fn into_inner(self) -> R { self.inner }
}

impl<R: AsyncRead + Unpin> CapturingBodyReader<R> {
    /// Returns the captured body prefix.
    ///
    /// When nothing was consumed and capture is enabled, the body is probed
    /// with a single read of at most `limit` bytes, once, purely for the
    /// snapshot. Those bytes are not counted as consumed and are not
    /// replayed to later readers.
    pub async fn snapshot(&mut self) -> Bytes {
        if self.consumed == 0 && !self.probed && self.capture.capacity() > 0 {
            self.probed = true;
            let limit = self.capture.capacity();
            let mut buf = Vec::with_capacity(limit.min(PROBE_CHUNK));
            match (&mut self.inner).take(limit as u64).read_buf(&mut buf).await {
                Ok(n) => {
                    self.capture.append(&buf[..n]);
                }
                Err(e) => debug!("request body probe failed: {e}"),
            }
        }
        Bytes::copy_from_slice(self.capture.as_bytes())
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CapturingBodyReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let fresh = &buf.filled()[before..];
        this.consumed += fresh.len() as u64;
        this.capture.append(fresh);
        Poll::Ready(Ok(()))
    }
}
