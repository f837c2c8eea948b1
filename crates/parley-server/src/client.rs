use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use parley_core::ids::ClientId;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// A connected WebSocket client.
pub struct Client {
    pub id: ClientId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new client and return its id and outbound queue.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients.insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        (id, rx)
    }

    /// Returns whether the client was still registered.
    pub fn unregister(&self, id: &ClientId) -> bool {
        match self.clients.remove(id) {
            Some((_, client)) => {
                client.connected.store(false, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Queue a message for one client. A full queue drops the message.
    pub fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        let Some(client) = self.get(client_id) else {
            return false;
        };
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %client_id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a message for every connected client. Returns how many accepted it.
    pub fn broadcast(&self, message: &str) -> usize {
        let mut delivered = 0;
        for entry in self.clients.iter() {
            let client = entry.value();
            if client.is_connected() && client.tx.try_send(message.to_string()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Drop clients that have not answered a ping within [`CLIENT_TIMEOUT`].
    pub fn cleanup_dead_clients(&self) -> Vec<ClientId> {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(client_id = %id, "cleaned up dead client");
        }
        dead
    }
}

/// Pump one WebSocket: a writer drains the outbound queue and pings on the
/// heartbeat, a reader forwards text frames and records pongs. Returns when
/// either side ends.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(axum::body::Bytes::new())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "sent ping");
                }
            }
        }
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if on_message.send((reader_cid.clone(), text.to_string())).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.get(&reader_cid) {
                        client.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
}

/// Periodically remove dead clients, reporting each removal through `on_removed`.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
    on_removed: impl Fn(&ClientId) + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            for id in &removed {
                on_removed(id);
            }
            if !removed.is_empty() {
                tracing::info!(removed = removed.len(), "dead client cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister() {
        let registry = ClientRegistry::new(32);
        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("client_"));
        assert_eq!(registry.count(), 2);

        assert!(registry.unregister(&id1));
        assert!(!registry.unregister(&id1));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unregister_marks_client_disconnected() {
        let registry = ClientRegistry::new(32);
        let (id, _rx) = registry.register();
        let client = registry.get(&id).unwrap();
        assert!(client.is_connected());
        registry.unregister(&id);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn send_to_specific_client() {
        let registry = ClientRegistry::new(32);
        let (id, mut rx) = registry.register();
        let (_other, mut other_rx) = registry.register();

        assert!(registry.send_to(&id, "only you".into()));
        assert_eq!(rx.recv().await.unwrap(), "only you");
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn send_to_unknown_client() {
        let registry = ClientRegistry::new(32);
        assert!(!registry.send_to(&ClientId::new(), "x".into()));
    }

    #[test]
    fn full_queue_drops_message() {
        let registry = ClientRegistry::new(2);
        let (id, _rx) = registry.register();
        assert!(registry.send_to(&id, "1".into()));
        assert!(registry.send_to(&id, "2".into()));
        assert!(!registry.send_to(&id, "3".into()));
    }

    #[test]
    fn broadcast_reaches_everyone() {
        let registry = ClientRegistry::new(32);
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        assert_eq!(registry.broadcast("status"), 2);
        assert_eq!(rx_a.try_recv().unwrap(), "status");
        assert_eq!(rx_b.try_recv().unwrap(), "status");
    }

    #[test]
    fn pong_keeps_client_alive() {
        let (tx, _rx) = mpsc::channel(1);
        let client = Client::new(ClientId::new(), tx);
        assert!(client.is_alive());
        client.last_pong.store(0, Ordering::Relaxed);
        assert!(!client.is_alive());
        client.record_pong();
        assert!(client.is_alive());
    }

    #[test]
    fn cleanup_removes_expired_clients() {
        let registry = ClientRegistry::new(32);
        let (stale, _rx1) = registry.register();
        let (_fresh, _rx2) = registry.register();

        registry.get(&stale).unwrap().last_pong.store(0, Ordering::Relaxed);

        let removed = registry.cleanup_dead_clients();
        assert_eq!(removed, vec![stale]);
        assert_eq!(registry.count(), 1);
    }
}
