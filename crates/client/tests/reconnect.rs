//! Client behavior against a minimal WebSocket acceptor: handler
//! dispatch, reconnect after an unexpected drop, and the attempt cap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use pactline_client::{ClientConfig, WsClient};
use pactline_protocol::Envelope;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/api/websocket", listener.local_addr().unwrap());
    (listener, url)
}

fn test_config(url: &str) -> ClientConfig {
    let mut config = ClientConfig::new(url);
    config.ping_interval = Duration::from_secs(60);
    config.base_delay = Duration::from_millis(50);
    config
}

#[tokio::test]
async fn welcome_dispatches_to_registered_handler() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let welcome = Envelope::welcome("session-1").encode().unwrap();
        ws.send(tungstenite::Message::Text(welcome)).await.unwrap();
        // Hold the connection open until the test finishes.
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let client = WsClient::new(test_config(&url));
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on("welcome", move |env| {
        let _ = tx.send(env.session_id.clone());
    });

    client.connect().await.unwrap();
    assert!(client.is_connected());

    let session_id = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("welcome not dispatched")
        .unwrap();
    assert_eq!(session_id.as_deref(), Some("session-1"));

    client.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn reconnects_after_unexpected_close() {
    let (listener, url) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));

    let server_accepts = accepts.clone();
    let server = tokio::spawn(async move {
        // First connection: handshake, then drop straight away.
        let (stream, _) = listener.accept().await.unwrap();
        server_accepts.fetch_add(1, Ordering::SeqCst);
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        drop(ws);

        // Second connection: keep it alive.
        let (stream, _) = listener.accept().await.unwrap();
        server_accepts.fetch_add(1, Ordering::SeqCst);
        let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let client = WsClient::new(test_config(&url));
    client.connect().await.unwrap();

    // The first connection drops; the client should come back on its own.
    let mut reconnected = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if accepts.load(Ordering::SeqCst) == 2 && client.is_connected() {
            reconnected = true;
            break;
        }
    }
    assert!(reconnected, "client did not reconnect");

    client.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn stops_retrying_after_max_attempts() {
    let (listener, url) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));

    let server_accepts = accepts.clone();
    let server = tokio::spawn(async move {
        // First connection succeeds, then drops to start the outage.
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        drop(ws);

        // Every retry reaches TCP accept but dies before the handshake.
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            server_accepts.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    let mut config = test_config(&url);
    config.base_delay = Duration::from_millis(20);
    let client = WsClient::new(config);
    client.connect().await.unwrap();

    // Attempt delays sum to 20+40+60+80+100 ms; leave generous margin.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 5, "expected exactly 5 retries");
    assert!(!client.is_connected());

    // No further attempts are scheduled after the cap.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 5);

    server.abort();
}

#[tokio::test]
async fn disconnect_suppresses_reconnect() {
    let (listener, url) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));

    let server_accepts = accepts.clone();
    let server = tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            server_accepts.fetch_add(1, Ordering::SeqCst);
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });

    let client = WsClient::new(test_config(&url));
    client.connect().await.unwrap();
    client.disconnect().await;
    // Idempotent.
    client.disconnect().await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 1, "deliberate close must not reconnect");
    assert!(!client.is_connected());

    server.abort();
}
