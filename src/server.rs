//! HTTP server and graceful shutdown.
//!
//! # Bridging handlers and hyper
//!
//! hyper wants a response value back from its service; handlers instead
//! write to a [`ResponseWriter`] while they run. The bridge spawns the
//! handler on its own task and hands it a writer backed by two channels:
//!
//! ```text
//! handler task                          hyper service
//! ────────────                          ─────────────
//! write_head / first write ──oneshot──► response head  → http::Response
//! write_all(chunk)         ──mpsc────►  StreamBody     → streamed frames
//! handler returns          ── drop ──►  end of body
//! ```
//!
//! The body channel is bounded, so a handler writing faster than the client
//! reads is suspended in `poll_write` instead of buffering without limit.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server stops accepting, lets every in-flight
//! connection finish and then returns from [`Server::serve`].

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use http::response::Parts;
use http::{HeaderMap, StatusCode};
use http_body::Frame;
use http_body_util::StreamBody;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::AsyncWrite;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;
use tracing::{error, info, trace, warn};

use crate::body::Body;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::response::ResponseWriter;

/// Chunks buffered between a handler and its connection.
const BODY_CHANNEL_CAPACITY: usize = 16;

type BodyFrame = Result<Frame<Bytes>, Infallible>;

/// Response body fed by a [`TransportWriter`]. Ends when the writer drops.
type ResponseBody = StreamBody<ReceiverStream<BodyFrame>>;

enum Listen {
    Addr(String),
    Listener(TcpListener),
}

/// The HTTP server.
pub struct Server {
    listen: Listen,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// An invalid `host:port` string surfaces as
    /// [`Error::InvalidAddress`] from `serve`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use httpmetrics::Server;
    /// let server = Server::bind("0.0.0.0:8000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        Self { listen: Listen::Addr(addr.to_owned()) }
    }

    /// Serves on a listener the caller already bound.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listen: Listen::Listener(listener) }
    }

    /// Starts accepting connections and dispatching them to `handler`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, handler: impl Handler) -> Result<(), Error> {
        self.serve_with_shutdown(handler, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), but shuts down when `signal` resolves.
    pub async fn serve_with_shutdown<S>(self, handler: impl Handler, signal: S) -> Result<(), Error>
    where
        S: Future<Output = ()>,
    {
        let listener = match self.listen {
            Listen::Addr(addr) => {
                let parsed: SocketAddr = addr
                    .parse()
                    .map_err(|source| Error::InvalidAddress { addr: addr.clone(), source })?;
                TcpListener::bind(parsed).await?
            }
            Listen::Listener(listener) => listener,
        };
        let local_addr = listener.local_addr()?;

        let handler: BoxedHandler = Arc::new(handler);

        info!(addr = %local_addr, "httpmetrics listening");

        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Shutdown first, so a pending signal stops accepting even
                // while connections are still queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let handler = Arc::clone(&handler);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| dispatch(Arc::clone(&handler), req));

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("httpmetrics stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs `handler` for one request and answers with whatever head it commits.
///
/// If the handler task ends without any head (it panicked), the client gets
/// an empty `500`.
async fn dispatch(
    handler: BoxedHandler,
    req: http::Request<Incoming>,
) -> Result<http::Response<ResponseBody>, Infallible> {
    let (parts, incoming) = req.into_parts();
    let mut req: Request = http::Request::from_parts(parts, Body::from(incoming));

    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut w = TransportWriter::new(head_tx, body_tx);
        handler.call(&mut req, &mut w).await;
        w.finish();
    });

    let body = StreamBody::new(ReceiverStream::new(body_rx));
    match head_rx.await {
        Ok(head) => Ok(http::Response::from_parts(head, body)),
        Err(_) => {
            error!("handler ended without a response head");
            // the writer is gone with the task, so the body is already closed
            let mut response = http::Response::new(body);
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            Ok(response)
        }
    }
}

/// [`ResponseWriter`] feeding one hyper response.
struct TransportWriter {
    head: Option<oneshot::Sender<Parts>>,
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: PollSender<BodyFrame>,
}

impl TransportWriter {
    fn new(head: oneshot::Sender<Parts>, body: mpsc::Sender<BodyFrame>) -> Self {
        Self {
            head: Some(head),
            status: None,
            headers: HeaderMap::new(),
            body: PollSender::new(body),
        }
    }

    /// Sends the response head; later calls do nothing.
    fn commit(&mut self, status: StatusCode) {
        let Some(tx) = self.head.take() else { return };
        self.status = Some(status);

        let (mut parts, ()) = http::Response::new(()).into_parts();
        parts.status = status;
        parts.headers = self.headers.clone();
        if tx.send(parts).is_err() {
            trace!("connection closed before the response head was sent");
        }
    }

    /// Commits `200 OK` if the handler never did and closes the body.
    fn finish(mut self) {
        self.commit(StatusCode::OK);
    }
}

impl ResponseWriter for TransportWriter {
    fn headers(&self) -> &HeaderMap { &self.headers }
    fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    fn write_head(&mut self, status: StatusCode) {
        match self.status {
            None => self.commit(status),
            Some(committed) => warn!(%committed, ignored = %status, "superfluous write_head call"),
        }
    }
}

impl AsyncWrite for TransportWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        this.commit(StatusCode::OK);
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        ready!(this.body.poll_reserve(cx)).map_err(|_| closed())?;
        let frame = Frame::data(Bytes::copy_from_slice(buf));
        this.body.send_item(Ok(frame)).map_err(|_| closed())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.commit(StatusCode::OK);
        self.body.close();
        Poll::Ready(Ok(()))
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "client connection closed")
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C).
/// On Windows only Ctrl-C is available. A handler that cannot be installed
/// is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
