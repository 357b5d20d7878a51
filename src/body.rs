//! Request body stream.
//!
//! A [`Body`] is a type-erased [`AsyncRead`]. Handlers read it with
//! `tokio::io::AsyncReadExt`; the collector swaps in a capturing reader while a
//! request is being measured and takes it back afterwards with
//! [`Body::downcast`].

use std::any::Any;
use std::fmt;
use std::io;
use std::io::Cursor;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;

/// Object-safe stream bound with enough `Any` plumbing to recover the
/// concrete type later.
trait Stream: AsyncRead + Send + Unpin + 'static {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: AsyncRead + Send + Unpin + 'static> Stream for T {
    fn as_any(&self) -> &dyn Any { self }
    fn into_any(self: Box<Self>) -> Box<dyn Any> { self }
}

/// An inbound request body.
#[derive(Default)]
pub struct Body {
    stream: Option<Box<dyn Stream>>,
}

impl Body {
    /// A body that is immediately at end-of-stream.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self { stream: Some(Box::new(reader)) }
    }

    /// Recovers the reader this body was built from, if it is a `R`.
    ///
    /// On a type mismatch the body is handed back untouched.
    pub fn downcast<R: 'static>(self) -> Result<R, Body> {
        let Some(stream) = self.stream else {
            return Err(self);
        };
        if !(*stream).as_any().is::<R>() {
            return Err(Self { stream: Some(stream) });
        }
        Stream::into_any(stream)
            .downcast::<R>()
            .map(|reader| *reader)
            .map_err(|_| Body::empty())
    }
}

impl AsyncRead for Body {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.stream.as_mut() {
            Some(stream) => Pin::new(&mut **stream).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("empty", &self.stream.is_none())
            .finish()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self { Self::new(Cursor::new(bytes)) }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self { Bytes::from(bytes).into() }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self { Bytes::from_static(bytes).into() }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self { Bytes::from_static(s.as_bytes()).into() }
}

/// Data frames are read in order; trailers are skipped.
impl From<Incoming> for Body {
    fn from(incoming: Incoming) -> Self {
        let chunks = incoming
            .into_data_stream()
            .map(|chunk| chunk.map_err(io::Error::other));
        Self::new(StreamReader::new(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn reads_from_bytes() {
        let mut body = Body::from("Hello World");
        let mut out = String::new();
        body.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "Hello World");
    }

    #[tokio::test]
    async fn empty_body_is_at_eof() {
        let mut body = Body::empty();
        let mut out = Vec::new();
        assert_eq!(body.read_to_end(&mut out).await.unwrap(), 0);
    }

    #[test]
    fn downcast_recovers_reader() {
        let body = Body::new(Cursor::new(vec![1u8, 2, 3]));
        let reader = body.downcast::<Cursor<Vec<u8>>>().unwrap();
        assert_eq!(reader.into_inner(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn downcast_mismatch_returns_body() {
        let body = Body::from("abc");
        let mut body = body.downcast::<Cursor<Vec<u8>>>().unwrap_err();
        let mut out = String::new();
        body.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "abc");
    }
}
