//! The per-request metrics record and the consumer trait that receives it.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri, Version};

// ── Custom metrics ────────────────────────────────────────────────────────────

/// Request-scoped key/value annotations set by a handler while it runs.
///
/// Values keep their concrete type: whatever the handler stores is read back
/// by the consumer with the same type via [`CustomMetrics::get`].
#[derive(Default)]
pub struct CustomMetrics {
    values: HashMap<Cow<'static, str>, Box<dyn Any + Send + Sync>>,
}

impl CustomMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set<T>(&mut self, key: impl Into<Cow<'static, str>>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Returns the value under `key` if it exists and is a `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|value| (**value).downcast_ref::<T>())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|key| &**key)
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

impl fmt::Debug for CustomMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

// ── Metrics ───────────────────────────────────────────────────────────────────

/// Everything observed about one request/response exchange.
///
/// Built once by the [`Collector`](crate::Collector) after the handler
/// returns and handed by value to exactly one consumer.
#[derive(Debug)]
pub struct Metrics {
    pub(crate) duration: Duration,
    pub(crate) request: MetricsRequest,
    pub(crate) response: MetricsResponse,
    pub(crate) custom: CustomMetrics,
}

impl Metrics {
    /// Wall time spent inside the handler.
    pub fn duration(&self) -> Duration { self.duration }
    pub fn request(&self) -> &MetricsRequest { &self.request }
    pub fn response(&self) -> &MetricsResponse { &self.response }
    pub fn custom_metrics(&self) -> &CustomMetrics { &self.custom }

    /// Shorthand for `self.custom_metrics().get(key)`.
    pub fn custom_metric<T: Any>(&self, key: &str) -> Option<&T> {
        self.custom.get(key)
    }
}

/// The request side of [`Metrics`].
#[derive(Debug)]
pub struct MetricsRequest {
    pub(crate) head: http::Request<()>,
    pub(crate) body: Bytes,
    pub(crate) consumed_body_bytes: u64,
}

impl MetricsRequest {
    /// The request head with its body detached.
    pub fn head(&self) -> &http::Request<()> { &self.head }
    pub fn method(&self) -> &Method { self.head.method() }
    pub fn uri(&self) -> &Uri { self.head.uri() }
    pub fn version(&self) -> Version { self.head.version() }
    pub fn headers(&self) -> &HeaderMap { self.head.headers() }

    /// Captured prefix of the body, at most the configured request limit.
    pub fn body(&self) -> &Bytes { &self.body }

    /// Bytes the handler actually read; not capped by the capture limit.
    pub fn consumed_body_bytes(&self) -> u64 { self.consumed_body_bytes }
}

/// The response side of [`Metrics`].
#[derive(Debug)]
pub struct MetricsResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) written_body_bytes: u64,
}

impl MetricsResponse {
    /// Status of the first status-setting call.
    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Captured prefix of the body, at most the configured response limit.
    pub fn body(&self) -> &Bytes { &self.body }

    /// Bytes the handler wrote; not capped by the capture limit.
    pub fn written_body_bytes(&self) -> u64 { self.written_body_bytes }
}

// ── MetricsSink ───────────────────────────────────────────────────────────────

/// Receives finished [`Metrics`].
///
/// Implemented for every `Fn(Metrics)` closure, so most consumers are just
/// closures passed to [`Collector::collect`](crate::Collector::collect).
/// Delivery is synchronous: a slow sink extends the request's latency.
pub trait MetricsSink: Send + Sync + 'static {
    fn deliver(&self, metrics: Metrics);
}

impl<F> MetricsSink for F
where
    F: Fn(Metrics) + Send + Sync + 'static,
{
    fn deliver(&self, metrics: Metrics) {
        self(metrics)
    }
}
