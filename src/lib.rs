//! # httpmetrics
//!
//! Per-request HTTP metrics as middleware. Wrap a handler in a [`Collector`],
//! register consumers, and every collected request yields one [`Metrics`]
//! record: timing, request head, response status and headers, byte counts,
//! a bounded copy of each body and any custom values the handler attached.
//!
//! ## The contract
//!
//! The collector never changes what the client sees. Reads and writes pass
//! through unchanged; it only watches them.
//!
//! - **Routing is exact.** Paths are normalized (case, duplicate and trailing
//!   slashes) and then matched as a whole. There are no patterns.
//! - **One consumer per request.** A route beats the [`Decider`], which beats
//!   the fallback. Requests nobody claims cost nothing beyond the lookup.
//! - **Capture is bounded.** Body copies stop at the configured limit; byte
//!   counts do not. A limit of `0` turns capture off.
//! - **Delivery is synchronous.** Consumers run on the request task, after
//!   the handler returns. Slow consumers slow the request.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use httpmetrics::{CollectOptions, Collector, Metrics, Server, handler_fn};
//! use tokio::io::AsyncWriteExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), httpmetrics::Error> {
//!     let app = handler_fn(|_req, w| Box::pin(async move {
//!         let _ = w.write_all(b"Hello World").await;
//!     }));
//!
//!     let collector = Collector::new(
//!         CollectOptions::new(app)
//!             .with_request_body_limit(1024)
//!             .with_response_body_limit(1024),
//!     );
//!     collector.collect(
//!         |m: Metrics| println!("{} {} {:?}", m.request().method(), m.response().status(), m.duration()),
//!         &["/hello"],
//!     );
//!
//!     Server::bind("0.0.0.0:8000").serve(collector).await
//! }
//! ```

mod body;
mod capture;
mod collector;
mod error;
mod handler;
mod metrics;
mod reader;
mod request;
mod response;
mod routes;
mod server;
mod writer;

pub use body::Body;
pub use capture::BoundedCapture;
pub use collector::{CollectOptions, Collector, DecisionContext, Decider};
pub use error::Error;
pub use handler::{BoxFuture, BoxedHandler, Handler, HandlerFn, handler_fn};
pub use metrics::{CustomMetrics, Metrics, MetricsRequest, MetricsResponse, MetricsSink};
pub use reader::CapturingBodyReader;
pub use request::{Request, detach};
pub use response::{ResponseBuffer, ResponseWriter, custom_metric, set_custom_metric};
pub use routes::{RouteTable, WILDCARD, normalize_path};
pub use server::Server;
pub use writer::CapturingResponseWriter;
