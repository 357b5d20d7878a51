//! Path → consumer table.
//!
//! Exact matches only. Paths are normalized on the way in and on lookup, so
//! `/a/b`, `/A/B/` and `a//b` all land on the same entry. The wildcard `*`
//! (or registering with no paths at all) sets the fallback consumer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::metrics::MetricsSink;

/// Registration token that selects the fallback consumer.
pub const WILDCARD: &str = "*";

/// A guarded path → [`MetricsSink`] map plus one fallback sink.
///
/// One mutex covers both; it is only held for the map operation itself.
#[derive(Default)]
pub struct RouteTable {
    inner: Mutex<Routes>,
}

#[derive(Default)]
struct Routes {
    exact: HashMap<String, Arc<dyn MetricsSink>>,
    fallback: Option<Arc<dyn MetricsSink>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes each of `paths` to `sink`. Existing entries are overwritten.
    ///
    /// An empty `paths`, or the [`WILDCARD`] among them (trailing slashes
    /// ignored), makes `sink` the fallback.
    pub fn register(&self, sink: Arc<dyn MetricsSink>, paths: &[&str]) {
        let mut fallback = paths.is_empty();
        let keys: Vec<String> = paths
            .iter()
            .filter(|path| {
                let wildcard = path.trim_end_matches('/') == WILDCARD;
                fallback |= wildcard;
                !wildcard
            })
            .map(|path| normalize_path(path))
            .collect();

        {
            let mut routes = self.inner.lock();
            for key in &keys {
                routes.exact.insert(key.clone(), Arc::clone(&sink));
            }
            if fallback {
                routes.fallback = Some(Arc::clone(&sink));
            }
        }

        for key in &keys {
            debug!(path = %key, "metrics route registered");
        }
        if fallback {
            debug!("fallback metrics consumer registered");
        }
    }

    /// The sink registered for exactly this (normalized) path.
    pub fn lookup(&self, path: &str) -> Option<Arc<dyn MetricsSink>> {
        let key = normalize_path(path);
        self.inner.lock().exact.get(&key).cloned()
    }

    pub fn fallback(&self) -> Option<Arc<dyn MetricsSink>> {
        self.inner.lock().fallback.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lower-cases `path`, resolves `.` and `..`, collapses repeated slashes and
/// returns it with exactly one leading slash and no trailing slash.
/// The root normalizes to `/`.
pub fn normalize_path(path: &str) -> String {
    let lowered = path.to_lowercase();
    let mut segments: Vec<&str> = Vec::new();
    for segment in lowered.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return "/".to_owned();
    }
    let mut out = String::with_capacity(lowered.len() + 1);
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Metrics, MetricsRequest, MetricsResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sink() -> Arc<dyn MetricsSink> {
        Arc::new(|_: Metrics| {})
    }

    fn empty_metrics() -> Metrics {
        Metrics {
            duration: Default::default(),
            request: MetricsRequest {
                head: http::Request::new(()),
                body: Default::default(),
                consumed_body_bytes: 0,
            },
            response: MetricsResponse {
                status: http::StatusCode::OK,
                headers: Default::default(),
                body: Default::default(),
                written_body_bytes: 0,
            },
            custom: Default::default(),
        }
    }

    #[test]
    fn normalizes_paths() {
        assert_eq!(normalize_path("/a/b"), "/a/b");
        assert_eq!(normalize_path("/A/B/"), "/a/b");
        assert_eq!(normalize_path("a/b"), "/a/b");
        assert_eq!(normalize_path("//a///b//"), "/a/b");
        assert_eq!(normalize_path("/a/./c/../b"), "/a/b");
        assert_eq!(normalize_path("/../a"), "/a");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/TEST/"), "/test");
    }

    #[test]
    fn equivalent_registrations_share_one_entry() {
        let table = RouteTable::new();
        table.register(sink(), &["/a/b", "/A/B/", "a/b"]);

        assert_eq!(table.len(), 1);
        assert!(table.lookup("/a/b").is_some());
        assert!(table.lookup("/A/b/").is_some());
        assert!(table.lookup("/a").is_none());
        assert!(table.lookup("/a/b/c").is_none());
        assert!(table.fallback().is_none());
    }

    #[test]
    fn wildcard_and_empty_paths_set_fallback() {
        let table = RouteTable::new();
        table.register(sink(), &[WILDCARD]);
        assert!(table.fallback().is_some());
        assert!(table.is_empty());

        let table = RouteTable::new();
        table.register(sink(), &[]);
        assert!(table.fallback().is_some());
        assert!(table.lookup("/anything").is_none());

        let table = RouteTable::new();
        table.register(sink(), &["*/"]);
        assert!(table.fallback().is_some());
        assert!(table.is_empty());

        let table = RouteTable::new();
        table.register(sink(), &["/x", WILDCARD]);
        assert!(table.fallback().is_some());
        assert!(table.lookup("/x").is_some());
    }

    #[test]
    fn last_registration_wins() {
        let hits = Arc::new(AtomicUsize::new(0));
        let table = RouteTable::new();
        table.register(sink(), &["/test"]);

        let counter = Arc::clone(&hits);
        table.register(
            Arc::new(move |_: Metrics| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            &["/TEST"],
        );

        assert_eq!(table.len(), 1);
        let winner = table.lookup("/test").unwrap();
        winner.deliver(empty_metrics());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_registration_and_lookup() {
        let table = Arc::new(RouteTable::new());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    let path = format!("/route/{i}");
                    table.register(sink(), &[path.as_str()]);
                    assert!(table.lookup(&path).is_some());
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(table.len(), 8);
    }
}
