//! Connection registry and broadcast fan-out
//!
//! Authoritative, in-memory mapping from connection token to session
//! metadata. Nothing is persisted; the registry starts empty on every
//! hub restart. This is the only shared mutable state in the hub, and
//! every component mutates it through the operations below.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use pactline_protocol::Envelope;

/// Stable token identifying one live connection.
///
/// Allocated at accept time and handed to the transport task; the map is
/// keyed by the token rather than by any live socket handle.
pub type ConnectionId = u64;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate the next connection token.
pub fn next_connection_id() -> ConnectionId {
    CONNECTION_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Frame handed to a connection's dedicated writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(Envelope),
    Close { code: u16, reason: String },
}

/// Sender half of a connection's outbound channel.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Metadata for one live connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub connected_at: DateTime<Utc>,
    /// Absent until the first liveness signal arrives.
    pub last_ping: Option<DateTime<Utc>>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            connected_at: Utc::now(),
            last_ping: None,
        }
    }
}

struct Entry {
    session: Session,
    outbound: OutboundSender,
}

/// In-memory map of live connections for one hub instance.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: HashMap<ConnectionId, Entry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Create and store a session for a freshly accepted connection.
    ///
    /// Registering a token that is already live is a logic error; the
    /// existing entry is kept and returned rather than overwritten.
    pub fn register(&mut self, conn: ConnectionId, outbound: OutboundSender) -> Session {
        match self.sessions.entry(conn) {
            MapEntry::Occupied(occupied) => {
                tracing::error!(conn, "Refusing duplicate registration for live connection");
                occupied.get().session.clone()
            }
            MapEntry::Vacant(vacant) => {
                let session = Session::new();
                vacant.insert(Entry {
                    session: session.clone(),
                    outbound,
                });
                session
            }
        }
    }

    /// Record a liveness signal for the connection.
    pub fn touch(&mut self, conn: ConnectionId) {
        if let Some(entry) = self.sessions.get_mut(&conn) {
            entry.session.last_ping = Some(Utc::now());
        } else {
            tracing::warn!(conn, "Liveness signal for unknown connection");
        }
    }

    /// Remove the session if present. Removing twice is not an error.
    pub fn remove(&mut self, conn: ConnectionId) -> Option<Session> {
        self.sessions.remove(&conn).map(|entry| entry.session)
    }

    /// Look up the session for a connection token.
    pub fn session(&self, conn: ConnectionId) -> Option<Session> {
        self.sessions.get(&conn).map(|entry| entry.session.clone())
    }

    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.sessions.contains_key(&conn)
    }

    /// Snapshot of current sessions, order-irrelevant.
    pub fn all(&self) -> Vec<Session> {
        self.sessions
            .values()
            .map(|entry| entry.session.clone())
            .collect()
    }

    pub fn count_active(&self) -> usize {
        self.sessions.len()
    }

    /// Fan an envelope out to every member except `exclude`.
    ///
    /// Membership is read at call time. A dead member is logged and
    /// skipped; remaining members still get the frame. Returns the number
    /// of successful deliveries.
    pub fn broadcast(&self, envelope: &Envelope, exclude: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        for (conn, entry) in &self.sessions {
            if Some(*conn) == exclude {
                continue;
            }
            if entry.outbound.send(Outbound::Frame(envelope.clone())).is_ok() {
                delivered += 1;
            } else {
                tracing::warn!(
                    conn = *conn,
                    session_id = %entry.session.id,
                    "Dropping broadcast to dead connection"
                );
            }
        }
        delivered
    }

    /// Close one connection with the given code and reason, removing it.
    pub fn close_connection(
        &mut self,
        conn: ConnectionId,
        code: u16,
        reason: &str,
    ) -> Option<Session> {
        let entry = self.sessions.remove(&conn)?;
        // The writer may already be gone; removal is what matters.
        let _ = entry.outbound.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
        Some(entry.session)
    }

    /// Close every connection and clear the registry.
    pub fn close_all(&mut self, code: u16, reason: &str) -> usize {
        let count = self.sessions.len();
        for (_, entry) in self.sessions.drain() {
            let _ = entry.outbound.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
        count
    }

    /// Evict sessions whose last liveness signal is older than `timeout`.
    ///
    /// Sessions that never signalled are left alone; the timeout only
    /// starts counting after the first ping.
    pub fn reap_idle(&mut self, timeout: std::time::Duration) -> Vec<Session> {
        let now = Utc::now();
        let stale: Vec<ConnectionId> = self
            .sessions
            .iter()
            .filter(|(_, entry)| {
                entry.session.last_ping.is_some_and(|last| {
                    now.signed_duration_since(last)
                        .to_std()
                        .is_ok_and(|elapsed| elapsed > timeout)
                })
            })
            .map(|(conn, _)| *conn)
            .collect();

        stale
            .into_iter()
            .filter_map(|conn| {
                self.close_connection(
                    conn,
                    pactline_protocol::CLOSE_NORMAL,
                    pactline_protocol::REASON_IDLE_TIMEOUT,
                )
            })
            .collect()
    }
}

/// Thread-safe registry handle shared across hub tasks.
pub type SharedRegistry = Arc<RwLock<ConnectionRegistry>>;

/// Create a new shared registry.
pub fn shared() -> SharedRegistry {
    Arc::new(RwLock::new(ConnectionRegistry::new()))
}

/// Session metadata for API responses
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub connected_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ping: Option<String>,
}

impl Session {
    /// Get session info for the API
    pub fn to_session_info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            connected_at: self
                .connected_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            last_ping: self
                .last_ping
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pactline_protocol::{MessageKind, CLOSE_NORMAL, REASON_IDLE_TIMEOUT};
    use std::time::Duration;

    fn channel() -> (OutboundSender, mpsc::UnboundedReceiver<Outbound>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn register_assigns_unique_ids() {
        let mut registry = ConnectionRegistry::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        let s1 = registry.register(1, tx1);
        let s2 = registry.register(2, tx2);

        assert_ne!(s1.id, s2.id);
        assert_eq!(registry.count_active(), 2);
    }

    #[test]
    fn duplicate_register_keeps_existing_entry() {
        let mut registry = ConnectionRegistry::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        let original = registry.register(7, tx1);
        let returned = registry.register(7, tx2);

        assert_eq!(original.id, returned.id);
        assert_eq!(registry.count_active(), 1);
    }

    #[test]
    fn touch_sets_last_ping_and_ignores_unknown() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        registry.register(1, tx);

        assert!(registry.session(1).unwrap().last_ping.is_none());
        registry.touch(1);
        let first = registry.session(1).unwrap().last_ping.unwrap();
        registry.touch(1);
        let second = registry.session(1).unwrap().last_ping.unwrap();
        assert!(second >= first);

        // Unknown handle must not panic.
        registry.touch(99);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        registry.register(1, tx);

        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());
        assert_eq!(registry.count_active(), 0);
    }

    #[test]
    fn broadcast_excludes_sender() {
        let mut registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let (tx3, mut rx3) = channel();
        registry.register(1, tx1);
        registry.register(2, tx2);
        registry.register(3, tx3);

        let env = Envelope::message(Some(serde_json::json!({"text": "hi"})));
        let delivered = registry.broadcast(&env, Some(1));

        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_err());
        assert!(matches!(rx2.try_recv(), Ok(Outbound::Frame(e)) if e.kind == MessageKind::Message));
        assert!(matches!(rx3.try_recv(), Ok(Outbound::Frame(_))));
    }

    #[test]
    fn broadcast_survives_dead_member() {
        let mut registry = ConnectionRegistry::new();
        let (tx1, rx1) = channel();
        let (tx2, mut rx2) = channel();
        registry.register(1, tx1);
        registry.register(2, tx2);
        drop(rx1); // member 1's writer is gone

        let env = Envelope::message(None);
        let delivered = registry.broadcast(&env, None);

        assert_eq!(delivered, 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn reap_evicts_stale_but_not_unsignalled_sessions() {
        let mut registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, _rx2) = channel();
        registry.register(1, tx1);
        registry.register(2, tx2);

        // Session 1 pinged once and then went silent; session 2 never
        // pinged at all and is deliberately exempt from eviction.
        registry.touch(1);
        std::thread::sleep(Duration::from_millis(20));

        let reaped = registry.reap_idle(Duration::from_millis(5));
        assert_eq!(reaped.len(), 1);
        assert_eq!(registry.count_active(), 1);
        assert!(registry.contains(2));

        match rx1.try_recv() {
            Ok(Outbound::Close { code, reason }) => {
                assert_eq!(code, CLOSE_NORMAL);
                assert_eq!(reason, REASON_IDLE_TIMEOUT);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[test]
    fn reap_leaves_recently_signalled_sessions() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        registry.register(1, tx);
        registry.touch(1);

        let reaped = registry.reap_idle(Duration::from_secs(300));
        assert!(reaped.is_empty());
        assert_eq!(registry.count_active(), 1);
    }

    #[test]
    fn close_all_clears_registry() {
        let mut registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        registry.register(1, tx1);
        registry.register(2, tx2);

        let closed = registry.close_all(CLOSE_NORMAL, "Server shutting down");
        assert_eq!(closed, 2);
        assert_eq!(registry.count_active(), 0);
        assert!(matches!(rx1.try_recv(), Ok(Outbound::Close { .. })));
        assert!(matches!(rx2.try_recv(), Ok(Outbound::Close { .. })));
    }
}
