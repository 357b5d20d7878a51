//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! The collector wraps exactly one inner handler, and collectors nest, so a
//! handler must be storable without knowing its concrete type. Handlers are
//! kept as `Arc<dyn Handler>` ([`BoxedHandler`]) and return a boxed future.
//!
//! The chain from user code to vtable call is:
//!
//! ```text
//! handler_fn(|req, w| Box::pin(async move { … }))   ← user writes this
//!        ↓
//! HandlerFn(closure)                                 ← implements Handler
//!        ↓  CollectOptions::new(handler)
//! Arc::new(HandlerFn(closure))                       ← stored as BoxedHandler
//!        ↓
//! handler.call(&mut req, &mut writer)  per request   ← one vtable dispatch
//! ```
//!
//! The future borrows both the request and the writer for the duration of
//! the call. That is what lets the collector hand the handler a decorated
//! writer and read its state back once the future completes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::ResponseWriter;

/// A heap-allocated, type-erased future borrowing for `'a`.
///
/// `Send` lets tokio move the future across worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn Handler>;

/// Serves one request by reading `req` and writing to `w`.
///
/// Implement it on your own types, or wrap a closure with [`handler_fn`].
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, req: &'a mut Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a, ()>;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn call<'a>(&'a self, req: &'a mut Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a, ()> {
        (**self).call(req, w)
    }
}

/// Adapts a closure returning a boxed future into a [`Handler`].
///
/// ```rust
/// use httpmetrics::{handler_fn, ResponseWriter};
/// use http::StatusCode;
/// use tokio::io::AsyncWriteExt;
///
/// let hello = handler_fn(|_req, w| Box::pin(async move {
///     w.write_head(StatusCode::OK);
///     let _ = w.write_all(b"Hello World").await;
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut dyn ResponseWriter) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    HandlerFn(f)
}

/// Newtype returned by [`handler_fn`], bridging a closure to [`Handler`].
#[derive(Clone, Copy)]
pub struct HandlerFn<F>(F);

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut dyn ResponseWriter) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(&'a self, req: &'a mut Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a, ()> {
        (self.0)(req, w)
    }
}
