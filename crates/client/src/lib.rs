//! Reconnecting WebSocket client for the pactline hub
//!
//! Maintains one outbound connection with a periodic liveness signal and
//! automatic reconnect after an unexpected close. The client is an
//! explicit instance owned by the embedding application's composition
//! root; construct one, keep it, and call [`WsClient::disconnect`] when
//! done.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::Message;

use pactline_protocol::{now_timestamp, Envelope, MessageKind, REASON_CLIENT_DISCONNECT};

/// Wildcard handler kind, invoked for every received envelope in addition
/// to the kind-specific handler.
pub const WILDCARD_KIND: &str = "*";

const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Connection settings for [`WsClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    /// How often to send a `ping` envelope while connected.
    pub ping_interval: Duration,
    /// Base delay for reconnect attempts; attempt N waits `base * N`.
    pub base_delay: Duration,
    /// Reconnect attempts before giving up on an outage.
    pub max_reconnect_attempts: u32,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ping_interval: DEFAULT_PING_INTERVAL,
            base_delay: DEFAULT_BASE_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Delay before the given reconnect attempt (1-based), growing linearly.
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    base * attempt
}

type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Per-kind callback table; at most one handler per kind, last
/// registration wins.
#[derive(Default)]
struct Handlers {
    map: RwLock<HashMap<String, Handler>>,
}

impl Handlers {
    fn set(&self, kind: &str, handler: Handler) {
        self.map
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(kind.to_string(), handler);
    }

    fn remove(&self, kind: &str) {
        self.map
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(kind);
    }

    fn dispatch(&self, envelope: &Envelope) {
        let map = self
            .map
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handler) = map.get(&envelope.kind.to_string()) {
            handler(envelope);
        }
        if let Some(handler) = map.get(WILDCARD_KIND) {
            handler(envelope);
        }
    }
}

/// Tasks and channel backing one live connection.
struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    pinger: JoinHandle<()>,
}

impl Connection {
    fn abort(&self) {
        self.writer.abort();
        self.reader.abort();
        self.pinger.abort();
    }
}

struct Inner {
    config: ClientConfig,
    handlers: Handlers,
    connection: Mutex<Option<Connection>>,
    connected: AtomicBool,
    closing: AtomicBool,
}

/// Resilient client handle.
pub struct WsClient {
    inner: Arc<Inner>,
}

impl WsClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                handlers: Handlers::default(),
                connection: Mutex::new(None),
                connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Establish the connection.
    ///
    /// Resolves once the handshake completes and the liveness signal is
    /// running; errors if the connection cannot be established. A failed
    /// initial dial is not retried automatically.
    pub async fn connect(&self) -> Result<()> {
        self.inner.closing.store(false, Ordering::SeqCst);
        open_connection(&self.inner).await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Register the handler for a message kind; the previous handler for
    /// that kind, if any, is replaced. [`WILDCARD_KIND`] receives every
    /// envelope.
    pub fn on<F>(&self, kind: &str, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.handlers.set(kind, Arc::new(handler));
    }

    /// Deregister the handler for a message kind.
    pub fn off(&self, kind: &str) {
        self.inner.handlers.remove(kind);
    }

    /// Build an envelope with a fresh timestamp and transmit it.
    ///
    /// A no-op (with a logged error) when the connection is not open.
    pub fn send(&self, kind: &str, data: Option<serde_json::Value>) {
        if !self.is_connected() {
            tracing::error!("WebSocket is not connected");
            return;
        }

        let envelope = Envelope {
            kind: MessageKind::from(kind),
            data,
            message: None,
            session_id: None,
            timestamp: now_timestamp(),
        };
        transmit(&self.inner, &envelope);
    }

    /// Close the connection with a normal-closure code. Idempotent; also
    /// suppresses any pending reconnect.
    pub async fn disconnect(&self) {
        self.inner.closing.store(true, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);

        let connection = self
            .inner
            .connection
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(connection) = connection else {
            return;
        };

        let _ = connection.outbound.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: REASON_CLIENT_DISCONNECT.into(),
        })));
        // The writer exits after flushing the close frame.
        let _ = tokio::time::timeout(Duration::from_secs(1), connection.writer).await;
        connection.reader.abort();
        connection.pinger.abort();
        tracing::info!("WebSocket disconnected");
    }
}

fn transmit(inner: &Inner, envelope: &Envelope) {
    let text = match envelope.encode() {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode envelope");
            return;
        }
    };
    let guard = inner
        .connection
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(connection) = guard.as_ref() {
        if connection.outbound.send(Message::Text(text)).is_err() {
            tracing::warn!("Outbound channel closed, message dropped");
        }
    } else {
        tracing::error!("WebSocket is not connected");
    }
}

/// Dial the hub and wire up the writer, reader and liveness tasks.
async fn open_connection(inner: &Arc<Inner>) -> Result<()> {
    let (ws, _response) = connect_async(inner.config.url.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", inner.config.url))?;
    tracing::info!(url = %inner.config.url, "WebSocket connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Writer: sole owner of the sink; exits after a close frame.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if ws_tx.send(msg).await.is_err() {
                break;
            }
            if is_close {
                break;
            }
        }
    });

    // Liveness signal on a fixed cadence while the connection is open.
    let ping_inner = Arc::clone(inner);
    let ping_tx = outbound_tx.clone();
    let pinger = tokio::spawn(async move {
        loop {
            tokio::time::sleep(ping_inner.config.ping_interval).await;
            if !ping_inner.connected.load(Ordering::SeqCst) {
                break;
            }
            match Envelope::ping().encode() {
                Ok(text) => {
                    if ping_tx.send(Message::Text(text)).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to encode ping"),
            }
        }
    });

    // Reader: dispatch inbound envelopes, detect the connection dropping.
    let reader_inner = Arc::clone(inner);
    let reader = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => match Envelope::decode(&text) {
                    Ok(envelope) => reader_inner.handlers.dispatch(&envelope),
                    Err(e) => tracing::warn!(error = %e, "Failed to decode inbound frame"),
                },
                Ok(Message::Close(frame)) => {
                    if let Some(frame) = frame {
                        tracing::info!(
                            code = %frame.code,
                            reason = %frame.reason,
                            "Server closed connection"
                        );
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket error");
                    break;
                }
            }
        }
        on_connection_lost(&reader_inner);
    });

    // Replace any previous connection's tasks before installing the new one.
    let previous = inner
        .connection
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .replace(Connection {
            outbound: outbound_tx,
            writer,
            reader,
            pinger,
        });
    if let Some(previous) = previous {
        previous.abort();
    }

    inner.connected.store(true, Ordering::SeqCst);
    Ok(())
}

/// Reader saw the connection drop: stop signalling and, unless the close
/// was deliberate, start the reconnect schedule.
fn on_connection_lost(inner: &Arc<Inner>) {
    inner.connected.store(false, Ordering::SeqCst);
    if inner.closing.load(Ordering::SeqCst) {
        return;
    }
    tracing::warn!("Connection lost unexpectedly");
    let reconnect_inner = Arc::clone(inner);
    tokio::spawn(reconnect_loop(reconnect_inner));
}

/// Linear-backoff reconnect: attempt N waits `base_delay * N`. A
/// successful open ends the outage (the next outage starts back at
/// attempt 1); exhausting the attempts stops retrying for good.
async fn reconnect_loop(inner: Arc<Inner>) {
    let max = inner.config.max_reconnect_attempts;
    for attempt in 1..=max {
        let delay = reconnect_delay(inner.config.base_delay, attempt);
        tracing::info!(
            attempt,
            max,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling reconnect"
        );
        tokio::time::sleep(delay).await;
        if inner.closing.load(Ordering::SeqCst) {
            return;
        }
        match open_connection(&inner).await {
            Ok(()) => return,
            Err(e) => tracing::warn!(attempt, error = %e, "Reconnection failed"),
        }
    }
    tracing::error!(max, "Max reconnect attempts reached");
}
