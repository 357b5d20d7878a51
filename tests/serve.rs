use std::time::Duration;

use http::{HeaderValue, StatusCode};
use httpmetrics::{CollectOptions, Collector, Metrics, Server, handler_fn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

/// Raw HTTP/1.1 round trip; the server closes the connection afterwards.
async fn roundtrip(addr: std::net::SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8(response).unwrap()
}

#[tokio::test]
async fn collects_over_a_real_connection() {
    let echo = handler_fn(|req, w| Box::pin(async move {
        let mut body = Vec::new();
        req.body_mut().read_to_end(&mut body).await.unwrap();
        w.headers_mut().insert("content-length", HeaderValue::from(body.len()));
        w.headers_mut().insert("x-custom-header", HeaderValue::from_static("VALUE"));
        w.write_head(StatusCode::CREATED);
        w.write_all(&body).await.unwrap();
    }));

    let collector = Collector::new(
        CollectOptions::new(echo)
            .with_request_body_limit(5)
            .with_response_body_limit(1024),
    );
    let (metrics_tx, mut metrics_rx) = mpsc::unbounded_channel::<Metrics>();
    collector.collect(move |m: Metrics| { let _ = metrics_tx.send(m); }, &["/echo"]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(
        Server::from_listener(listener).serve_with_shutdown(collector, async {
            let _ = stop_rx.await;
        }),
    );

    let response = roundtrip(
        addr,
        "POST /Echo/ HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: 11\r\n\r\nHello World",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 201"), "{response}");
    assert!(response.to_lowercase().contains("x-custom-header: value"));
    assert!(response.ends_with("Hello World"));

    let metrics = tokio::time::timeout(Duration::from_secs(5), metrics_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(metrics.request().method(), http::Method::POST);
    assert_eq!(metrics.request().uri().path(), "/Echo/");
    assert_eq!(metrics.request().body(), "Hello");
    assert_eq!(metrics.request().consumed_body_bytes(), 11);
    assert_eq!(metrics.response().status(), StatusCode::CREATED);
    assert_eq!(metrics.response().body(), "Hello World");
    assert_eq!(metrics.response().written_body_bytes(), 11);

    // Unregistered path: served, not collected.
    let response = roundtrip(
        addr,
        "POST /other HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: 2\r\n\r\nhi",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 201"), "{response}");
    assert!(metrics_rx.try_recv().is_err());

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn handler_without_head_gets_ok() {
    let silent = handler_fn(|_req, _w| Box::pin(async {}));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(
        Server::from_listener(listener).serve_with_shutdown(silent, async {
            let _ = stop_rx.await;
        }),
    );

    let response = roundtrip(addr, "GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
