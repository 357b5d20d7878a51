//! Minimal httpmetrics example: one route consumer, one decider and a fallback.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl -d 'Hello World' http://localhost:8000/hello
//!   curl http://localhost:8000/debug/anything
//!   curl http://localhost:8000/other

use http::StatusCode;
use httpmetrics::{
    CollectOptions, Collector, DecisionContext, Decider, Metrics, MetricsSink, Server, handler_fn,
    set_custom_metric,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

/// Opts in every request under `/debug` and captures more of its response.
struct DebugPaths;

impl MetricsSink for DebugPaths {
    fn deliver(&self, m: Metrics) {
        info!(
            path = %m.request().uri().path(),
            status = m.response().status().as_u16(),
            body = ?m.response().body(),
            "debug request"
        );
    }
}

impl Decider for DebugPaths {
    fn decide(&self, ctx: &mut DecisionContext<'_>) {
        if ctx.request().uri().path().starts_with("/debug") {
            ctx.options_mut().set_response_body_limit(4096);
            ctx.set_collect(true);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), httpmetrics::Error> {
    tracing_subscriber::fmt::init();

    let app = handler_fn(|req, w| Box::pin(async move {
        let mut body = Vec::new();
        if req.body_mut().read_to_end(&mut body).await.is_err() {
            w.write_head(StatusCode::BAD_REQUEST);
            return;
        }
        set_custom_metric(w, "request_len", body.len());

        w.write_head(StatusCode::OK);
        let _ = w.write_all(b"Hello World\n").await;
    }));

    let collector = Collector::new(
        CollectOptions::new(app)
            .with_request_body_limit(128)
            .with_response_body_limit(128)
            .with_decider(DebugPaths),
    );

    collector.collect(
        |m: Metrics| {
            info!(
                method = %m.request().method(),
                status = m.response().status().as_u16(),
                request_len = ?m.custom_metric::<usize>("request_len"),
                elapsed_us = m.duration().as_micros() as u64,
                "hello"
            );
        },
        &["/hello"],
    );

    collector.collect(
        |m: Metrics| {
            info!(
                path = %m.request().uri().path(),
                written = m.response().written_body_bytes(),
                "fallback"
            );
        },
        &[],
    );

    Server::bind("0.0.0.0:8000").serve(collector).await
}
