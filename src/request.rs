//! Incoming HTTP request type.

use crate::body::Body;

/// An incoming HTTP request with a streaming [`Body`].
///
/// This is plain [`http::Request`], so method, URI, headers and extensions
/// are read the usual way; the body is read with `tokio::io::AsyncReadExt`.
pub type Request = http::Request<Body>;

/// Copies the request head (method, URI, version, headers) into a new request
/// without a body.
///
/// Decision collaborators and metrics consumers only ever see this detached
/// copy, so neither can consume or corrupt the body of the live exchange.
/// Extensions are not carried over.
pub fn detach<B>(req: &http::Request<B>) -> http::Request<()> {
    let mut head = http::Request::new(());
    *head.method_mut() = req.method().clone();
    *head.uri_mut() = req.uri().clone();
    *head.version_mut() = req.version();
    *head.headers_mut() = req.headers().clone();
    head
}
