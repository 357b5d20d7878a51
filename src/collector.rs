//! The metrics collector: a [`Handler`] that wraps another handler.
//!
//! # Per-request flow
//!
//! ```text
//! request ──► decide ──► passthrough ───────────────► inner handler
//!               │
//!               └──────► collect: wrap body + writer ─► inner handler
//!                                                         │
//!                              consumer ◄── Metrics ◄─────┘
//! ```
//!
//! Exactly one decision is made per request, first match wins:
//!
//! 1. no origin-form path (`*`, authority-form) → passthrough
//! 2. a route registered for the decoded, normalized path → that route's consumer
//! 3. the [`Decider`], if any, opts the request in → the decider itself
//! 4. a fallback consumer is registered → the fallback
//! 5. otherwise → passthrough
//!
//! Each request works on its own copy of [`CollectOptions`], so a decider may
//! raise or lower the capture limits for that request alone.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use tracing::{debug, trace};

use crate::body::Body;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::metrics::{Metrics, MetricsRequest, MetricsSink};
use crate::reader::CapturingBodyReader;
use crate::request::{Request, detach};
use crate::response::ResponseWriter;
use crate::routes::RouteTable;
use crate::writer::CapturingResponseWriter;

// ── Options ───────────────────────────────────────────────────────────────────

/// Configuration of a [`Collector`].
///
/// Capture limits are in bytes; `0` disables capturing that body, byte
/// counting stays on regardless.
#[derive(Clone)]
pub struct CollectOptions {
    handler: BoxedHandler,
    request_body_limit: usize,
    response_body_limit: usize,
    decider: Option<Arc<dyn Decider>>,
}

impl CollectOptions {
    /// Options wrapping `handler`, with body capture off and no decider.
    pub fn new(handler: impl Handler) -> Self {
        Self {
            handler: Arc::new(handler),
            request_body_limit: 0,
            response_body_limit: 0,
            decider: None,
        }
    }

    pub fn with_request_body_limit(mut self, limit: usize) -> Self {
        self.request_body_limit = limit;
        self
    }

    pub fn with_response_body_limit(mut self, limit: usize) -> Self {
        self.response_body_limit = limit;
        self
    }

    /// Consulted for requests no route matches, before the fallback.
    pub fn with_decider(mut self, decider: impl Decider) -> Self {
        self.decider = Some(Arc::new(decider));
        self
    }

    pub fn request_body_limit(&self) -> usize { self.request_body_limit }
    pub fn response_body_limit(&self) -> usize { self.response_body_limit }

    pub fn set_request_body_limit(&mut self, limit: usize) {
        self.request_body_limit = limit;
    }

    pub fn set_response_body_limit(&mut self, limit: usize) {
        self.response_body_limit = limit;
    }
}

impl fmt::Debug for CollectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectOptions")
            .field("request_body_limit", &self.request_body_limit)
            .field("response_body_limit", &self.response_body_limit)
            .field("decider", &self.decider.is_some())
            .finish_non_exhaustive()
    }
}

// ── Decider ───────────────────────────────────────────────────────────────────

/// What a [`Decider`] sees while deciding: the request head (no body), this
/// request's copy of the options, and the opt-in flag.
pub struct DecisionContext<'a> {
    request: &'a http::Request<()>,
    options: &'a mut CollectOptions,
    collect: bool,
}

impl<'a> DecisionContext<'a> {
    pub(crate) fn new(request: &'a http::Request<()>, options: &'a mut CollectOptions) -> Self {
        Self { request, options, collect: false }
    }

    pub fn request(&self) -> &http::Request<()> { self.request }
    pub fn options(&self) -> &CollectOptions { self.options }

    /// Changes made here apply to the current request only.
    pub fn options_mut(&mut self) -> &mut CollectOptions { self.options }

    /// Opts the request in (`true`) or leaves it to the fallback (`false`).
    pub fn set_collect(&mut self, collect: bool) {
        self.collect = collect;
    }

    pub fn is_collecting(&self) -> bool { self.collect }
}

/// An external collaborator deciding, per request, whether to collect.
///
/// Called in two roles on the same request: first
/// [`decide`](Decider::decide) with a [`DecisionContext`] before the handler
/// runs, then, only if it opted in, [`deliver`](MetricsSink::deliver) with
/// the finished [`Metrics`].
pub trait Decider: MetricsSink {
    fn decide(&self, ctx: &mut DecisionContext<'_>);
}

// ── Collector ─────────────────────────────────────────────────────────────────

/// Who receives the record of a collected request.
enum Consumer {
    Route(Arc<dyn MetricsSink>),
    Decider(Arc<dyn Decider>),
}

impl Consumer {
    fn kind(&self) -> &'static str {
        match self {
            Self::Route(_) => "route",
            Self::Decider(_) => "decider",
        }
    }

    fn deliver(&self, metrics: Metrics) {
        match self {
            Self::Route(sink) => sink.deliver(metrics),
            Self::Decider(decider) => decider.deliver(metrics),
        }
    }
}

struct Decision {
    consumer: Consumer,
    options: CollectOptions,
}

/// Middleware that measures requests and hands the [`Metrics`] to consumers.
///
/// ```rust,no_run
/// use httpmetrics::{CollectOptions, Collector, Metrics, Server, handler_fn};
/// use tokio::io::AsyncWriteExt;
///
/// # async fn run() -> Result<(), httpmetrics::Error> {
/// let app = handler_fn(|_req, w| Box::pin(async move {
///     let _ = w.write_all(b"Hello World").await;
/// }));
///
/// let collector = Collector::new(
///     CollectOptions::new(app)
///         .with_request_body_limit(128)
///         .with_response_body_limit(128),
/// );
/// collector.collect(|m: Metrics| println!("{} took {:?}", m.request().uri(), m.duration()), &[]);
///
/// Server::bind("0.0.0.0:8000").serve(collector).await
/// # }
/// ```
pub struct Collector {
    options: CollectOptions,
    routes: RouteTable,
}

impl Collector {
    pub fn new(options: CollectOptions) -> Self {
        Self { options, routes: RouteTable::new() }
    }

    pub fn options(&self) -> &CollectOptions { &self.options }

    /// Sends the metrics of requests to `paths` to `consumer`.
    ///
    /// Request paths are percent-decoded, then matched exactly after
    /// normalization (case, duplicate and trailing slashes). With no paths, or the wildcard `*`, `consumer`
    /// becomes the fallback for every request nothing else claims.
    /// Registering a path again replaces its consumer.
    pub fn collect<F>(&self, consumer: F, paths: &[&str])
    where
        F: Fn(Metrics) + Send + Sync + 'static,
    {
        self.routes.register(Arc::new(consumer), paths);
    }

    /// Like [`collect`](Collector::collect), for any [`MetricsSink`].
    pub fn collect_into(&self, sink: Arc<dyn MetricsSink>, paths: &[&str]) {
        self.routes.register(sink, paths);
    }

    fn decide(&self, req: &Request) -> Option<Decision> {
        if !req.uri().path().starts_with('/') {
            return None;
        }

        let path = percent_decode_str(req.uri().path()).decode_utf8_lossy();
        if let Some(sink) = self.routes.lookup(&path) {
            return Some(Decision { consumer: Consumer::Route(sink), options: self.options.clone() });
        }

        if let Some(decider) = &self.options.decider {
            let head = detach(req);
            let mut options = self.options.clone();
            let mut ctx = DecisionContext::new(&head, &mut options);
            decider.decide(&mut ctx);
            if ctx.is_collecting() {
                let consumer = Consumer::Decider(Arc::clone(decider));
                return Some(Decision { consumer, options });
            }
        }

        let sink = self.routes.fallback()?;
        Some(Decision { consumer: Consumer::Route(sink), options: self.options.clone() })
    }

    async fn serve(&self, req: &mut Request, w: &mut dyn ResponseWriter) {
        let Some(Decision { consumer, options }) = self.decide(req) else {
            trace!(path = req.uri().path(), "passthrough");
            return self.options.handler.call(req, w).await;
        };
        debug!(path = req.uri().path(), consumer = consumer.kind(), "collecting metrics");

        let head = detach(req);
        let original = std::mem::take(req.body_mut());
        *req.body_mut() = Body::new(CapturingBodyReader::new(original, options.request_body_limit));
        let mut writer = CapturingResponseWriter::new(&mut *w, options.response_body_limit);

        let start = Instant::now();
        options.handler.call(req, &mut writer).await;
        let duration = start.elapsed();

        let (body, consumed_body_bytes) = self.reclaim_body(req).await;
        let (response, custom) = writer.finish();
        let metrics = Metrics {
            duration,
            request: MetricsRequest { head, body, consumed_body_bytes },
            response,
            custom,
        };

        debug!(
            status = metrics.response.status.as_u16(),
            elapsed_us = duration.as_micros() as u64,
            "delivering metrics"
        );
        consumer.deliver(metrics);
    }

    /// Takes the capturing reader back out of the request, snapshots it and
    /// puts the original body back.
    ///
    /// A handler may have swapped the body for its own stream; the request
    /// side of the record is then left empty.
    async fn reclaim_body(&self, req: &mut Request) -> (Bytes, u64) {
        match std::mem::take(req.body_mut()).downcast::<CapturingBodyReader<Body>>() {
            Ok(mut reader) => {
                let body = reader.snapshot().await;
                let consumed = reader.consumed();
                *req.body_mut() = reader.into_inner();
                (body, consumed)
            }
            Err(replaced) => {
                *req.body_mut() = replaced;
                (Bytes::new(), 0)
            }
        }
    }
}

impl Handler for Collector {
    fn call<'a>(&'a self, req: &'a mut Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a, ()> {
        Box::pin(self.serve(req, w))
    }
}
