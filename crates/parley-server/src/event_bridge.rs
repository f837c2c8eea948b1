use std::sync::Arc;

use tokio::sync::broadcast;

use parley_core::events::ChatEvent;
use parley_engine::Lifecycle;

use crate::client::ClientRegistry;
use crate::wire;

/// Forwards engine `ChatEvent`s to WebSocket clients: addressed events go to
/// their client, everything else to every connected client.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    pub fn deliver(&self, event: &ChatEvent) {
        let Some(json) = wire::serialize_event(event) else {
            tracing::warn!(event_type = event.event_type(), "failed to serialize event");
            return;
        };
        match event.client_id() {
            Some(client_id) => {
                if !self.registry.send_to(client_id, json) {
                    tracing::debug!(
                        client_id = %client_id,
                        event_type = event.event_type(),
                        "event not delivered"
                    );
                }
            }
            None => {
                self.registry.broadcast(&json);
            }
        }
    }

    pub fn start(self, mut rx: broadcast::Receiver<ChatEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.deliver(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<ChatEvent>,
) -> tokio::task::JoinHandle<()> {
    EventBridge::new(registry).start(rx)
}

/// Publish every lifecycle transition as a `StatusChanged` event.
pub fn forward_status_changes(lifecycle: &Lifecycle, event_tx: broadcast::Sender<ChatEvent>) {
    lifecycle.subscribe(move |state| {
        let _ = event_tx.send(ChatEvent::StatusChanged { state });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parley_core::ids::{ClientId, SessionId};
    use parley_core::state::LifecycleState;

    fn chunk_for(client_id: &ClientId) -> ChatEvent {
        ChatEvent::Chunk {
            client_id: client_id.clone(),
            session_id: SessionId::from_raw("chat-1"),
            delta: "Hel".into(),
        }
    }

    #[tokio::test]
    async fn addressed_events_reach_only_their_client() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel(16);
        let (target, mut target_rx) = registry.register();
        let (_other, mut other_rx) = registry.register();

        let handle = create_bridge(Arc::clone(&registry), rx);
        tx.send(chunk_for(&target)).unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), target_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(json["type"], "chat.chunk");
        assert_eq!(json["data"]["content"], "Hel");
        assert!(other_rx.try_recv().is_err());

        handle.abort();
    }

    #[tokio::test]
    async fn status_changes_are_broadcast() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel(16);
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        let lifecycle = Lifecycle::new();
        forward_status_changes(&lifecycle, tx.clone());
        let handle = create_bridge(Arc::clone(&registry), rx);

        lifecycle.change_to(LifecycleState::Processing);

        for rx in [&mut rx_a, &mut rx_b] {
            let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(msg.contains("\"system.status\""));
            assert!(msg.contains("\"processing\""));
        }
        handle.abort();
    }

    #[test]
    fn events_for_departed_clients_are_dropped() {
        let registry = Arc::new(ClientRegistry::new(32));
        let bridge = EventBridge::new(Arc::clone(&registry));
        bridge.deliver(&chunk_for(&ClientId::from_raw("client_gone")));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn unchanged_state_publishes_nothing() {
        let (tx, mut rx) = broadcast::channel(16);
        let lifecycle = Lifecycle::new();
        forward_status_changes(&lifecycle, tx);
        lifecycle.change_to(LifecycleState::Idle);
        assert!(rx.try_recv().is_err());
    }
}
