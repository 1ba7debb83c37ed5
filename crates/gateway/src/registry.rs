use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Instant,
};

use {tokio::sync::mpsc, tracing::warn};

use parley_protocol::Envelope;

/// Frames the write pump understands.
#[derive(Debug)]
pub enum OutboundFrame {
    /// A serialized `{event, data}` envelope.
    Envelope(String),
    /// Close the socket with the given reason ("going away" on shutdown).
    Close { reason: &'static str },
}

/// One WebSocket connection. Producers enqueue through a bounded channel;
/// the write pump is the sole consumer. Enqueueing never blocks: a full
/// queue drops the newest envelope.
pub struct ClientHandle {
    pub conn_id: String,
    pub user_id: String,
    pub phone: Option<String>,
    pub joined_at: Instant,
    sender: mpsc::Sender<OutboundFrame>,
}

impl ClientHandle {
    pub fn new(
        conn_id: String,
        user_id: String,
        phone: Option<String>,
        sender: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        Self {
            conn_id,
            user_id,
            phone,
            joined_at: Instant::now(),
            sender,
        }
    }

    /// Non-blocking enqueue. Returns false when the frame was dropped.
    pub fn send_json(&self, frame: String) -> bool {
        if self
            .sender
            .try_send(OutboundFrame::Envelope(frame))
            .is_err()
        {
            warn!(conn_id = %self.conn_id, user_id = %self.user_id, "send queue full, dropping envelope");
            return false;
        }
        true
    }

    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        self.send_json(envelope.to_json())
    }

    /// Enqueue a close frame; used by graceful shutdown.
    pub fn send_close(&self, reason: &'static str) {
        let _ = self.sender.try_send(OutboundFrame::Close { reason });
    }
}

/// Process-local map from user id to that user's open connections.
///
/// Mutations take a short write lock; reads take a read lock and return
/// copied snapshots so callers never hold the lock across I/O.
#[derive(Default)]
pub struct ConnectionRegistry {
    clients: RwLock<HashMap<String, Vec<Arc<ClientHandle>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client: Arc<ClientHandle>) {
        let mut clients = self.clients.write().unwrap_or_else(|p| p.into_inner());
        clients
            .entry(client.user_id.clone())
            .or_default()
            .push(client);
    }

    pub fn unregister(&self, user_id: &str, conn_id: &str) {
        let mut clients = self.clients.write().unwrap_or_else(|p| p.into_inner());
        if let Some(conns) = clients.get_mut(user_id) {
            conns.retain(|c| c.conn_id != conn_id);
            if conns.is_empty() {
                clients.remove(user_id);
            }
        }
    }

    /// Snapshot of a user's connections.
    pub fn clients(&self, user_id: &str) -> Vec<Arc<ClientHandle>> {
        let clients = self.clients.read().unwrap_or_else(|p| p.into_inner());
        clients.get(user_id).cloned().unwrap_or_default()
    }

    /// Whether the user has at least one connection on this instance.
    pub fn is_connected(&self, user_id: &str) -> bool {
        let clients = self.clients.read().unwrap_or_else(|p| p.into_inner());
        clients.get(user_id).is_some_and(|c| !c.is_empty())
    }

    pub fn user_ids(&self) -> Vec<String> {
        let clients = self.clients.read().unwrap_or_else(|p| p.into_inner());
        clients.keys().cloned().collect()
    }

    /// Snapshot of every connection, for shutdown enumeration.
    pub fn all_clients(&self) -> Vec<Arc<ClientHandle>> {
        let clients = self.clients.read().unwrap_or_else(|p| p.into_inner());
        clients.values().flatten().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        let clients = self.clients.read().unwrap_or_else(|p| p.into_inner());
        clients.values().map(Vec::len).sum()
    }

    /// Send an envelope to every local connection of a user.
    pub fn send_to_user(&self, user_id: &str, envelope: &Envelope) {
        let json = envelope.to_json();
        for client in self.clients(user_id) {
            client.send_json(json.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn handle(conn_id: &str, user_id: &str) -> (Arc<ClientHandle>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(2);
        (
            Arc::new(ClientHandle::new(conn_id.into(), user_id.into(), None, tx)),
            rx,
        )
    }

    #[test]
    fn multi_device_registration() {
        let reg = ConnectionRegistry::new();
        let (a1, _rx1) = handle("c1", "alice");
        let (a2, _rx2) = handle("c2", "alice");
        reg.register(a1);
        reg.register(a2);

        assert_eq!(reg.clients("alice").len(), 2);
        assert!(reg.is_connected("alice"));
        assert_eq!(reg.connection_count(), 2);

        reg.unregister("alice", "c1");
        assert!(reg.is_connected("alice"));
        reg.unregister("alice", "c2");
        assert!(!reg.is_connected("alice"));
        assert!(reg.user_ids().is_empty());
    }

    #[test]
    fn full_queue_drops_newest() {
        let (client, mut rx) = handle("c1", "alice");
        assert!(client.send_json("one".into()));
        assert!(client.send_json("two".into()));
        // Queue capacity is 2: the third enqueue is dropped, not blocked.
        assert!(!client.send_json("three".into()));

        let mut got = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let OutboundFrame::Envelope(json) = frame {
                got.push(json);
            }
        }
        assert_eq!(got, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn send_to_user_reaches_all_devices() {
        let reg = ConnectionRegistry::new();
        let (a1, mut rx1) = handle("c1", "alice");
        let (a2, mut rx2) = handle("c2", "alice");
        reg.register(a1);
        reg.register(a2);

        reg.send_to_user("alice", &Envelope::new("pong", serde_json::json!({})));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}
