use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use parley_core::events::ChatEvent;
use parley_core::ids::ClientId;
use parley_core::state::LifecycleState;
use parley_telemetry::metrics::CONNECTED_CLIENTS;

use crate::client::{self, ClientRegistry};
use crate::event_bridge;
use crate::handlers::{self, HandlerState};
use crate::rpc::{RpcRequest, RpcResponse};
use crate::wire;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Outbound messages buffered per client before new ones are dropped.
    pub max_send_queue: usize,
    pub cleanup_interval: Duration,
    /// Served under `/audio` when set.
    pub audio_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5678,
            max_send_queue: 256,
            cleanup_interval: Duration::from_secs(60),
            audio_dir: None,
        }
    }
}

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub client_registry: Arc<ClientRegistry>,
    pub message_tx: mpsc::Sender<(ClientId, String)>,
}

impl AppState {
    fn update_client_gauge(&self) {
        if let Some(ref metrics) = self.handler_state.metrics {
            metrics.gauge_set(CONNECTED_CLIENTS, &[], self.client_registry.count() as f64);
        }
    }
}

pub fn build_router(state: AppState, audio_dir: Option<&PathBuf>) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler));
    if let Some(dir) = audio_dir {
        router = router.nest_service("/audio", ServeDir::new(dir));
    }
    router
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Handle returned by [`start`]. Dropping it leaves the tasks running.
pub struct ServerHandle {
    pub addr: SocketAddr,
    server: tokio::task::JoinHandle<()>,
    _bridge: tokio::task::JoinHandle<()>,
    _rpc: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Resolves when the HTTP server stops.
    pub async fn wait(self) {
        if let Err(e) = self.server.await {
            tracing::error!(error = %e, "server task failed");
        }
    }
}

/// Bind, wire the event bridge and RPC processor, and start serving.
pub async fn start(
    config: ServerConfig,
    handler_state: HandlerState,
    event_tx: broadcast::Sender<ChatEvent>,
) -> Result<ServerHandle, std::io::Error> {
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let handler_state = Arc::new(handler_state);

    let bridge_handle = event_bridge::create_bridge(Arc::clone(&client_registry), event_tx.subscribe());

    let (msg_tx, msg_rx) = mpsc::channel::<(ClientId, String)>(1024);
    let app_state = AppState {
        handler_state: Arc::clone(&handler_state),
        client_registry: Arc::clone(&client_registry),
        message_tx: msg_tx,
    };

    let cleanup_state = app_state.clone();
    let cleanup = client::start_cleanup_task(
        Arc::clone(&client_registry),
        config.cleanup_interval,
        move |id| {
            if let Some(ref orchestrator) = cleanup_state.handler_state.orchestrator {
                orchestrator.release_client(id);
            }
            cleanup_state.update_client_gauge();
        },
    );

    let rpc_handle = tokio::spawn(process_rpc_messages(
        msg_rx,
        Arc::clone(&handler_state),
        Arc::clone(&client_registry),
    ));

    let router = build_router(app_state, config.audio_dir.as_ref());
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;

    tracing::info!(%addr, "parley server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        addr,
        server,
        _bridge: bridge_handle,
        _rpc: rpc_handle,
        _cleanup: cleanup,
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn status_message(state: LifecycleState) -> Option<String> {
    wire::serialize_event(&ChatEvent::StatusChanged { state })
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.client_registry.register();
    tracing::info!(client_id = %client_id, "websocket client connected");
    state.update_client_gauge();

    if let Some(json) = status_message(state.handler_state.lifecycle_state()) {
        state.client_registry.send_to(&client_id, json);
    }

    client::handle_ws_connection(
        socket,
        client_id.clone(),
        rx,
        Arc::clone(&state.client_registry),
        state.message_tx.clone(),
    )
    .await;

    state.client_registry.unregister(&client_id);
    if let Some(ref orchestrator) = state.handler_state.orchestrator {
        orchestrator.release_client(&client_id);
    }
    state.update_client_gauge();
    tracing::info!(client_id = %client_id, "websocket client disconnected");
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let resp = handlers::dispatch(&state.handler_state, None, "health", &serde_json::json!({}), None).await;

    let healthy = resp
        .result
        .as_ref()
        .and_then(|r| r.get("status"))
        .and_then(|s| s.as_str())
        == Some("healthy");

    let http_status = if healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    (http_status, axum::Json(resp.result.unwrap_or_default()))
}

/// Handle incoming requests one at a time, in arrival order.
async fn process_rpc_messages(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    state: Arc<HandlerState>,
    registry: Arc<ClientRegistry>,
) {
    while let Some((client_id, raw_message)) = rx.recv().await {
        let response = match serde_json::from_str::<RpcRequest>(&raw_message) {
            Ok(request) => {
                tracing::debug!(client_id = %client_id, method = %request.method, "rpc request");
                let params = request.params.unwrap_or_else(|| serde_json::json!({}));
                handlers::dispatch(&state, Some(&client_id), &request.method, &params, request.id).await
            }
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "unparseable rpc message");
                RpcResponse::parse_error()
            }
        };

        if let Ok(json) = serde_json::to_string(&response) {
            registry.send_to(&client_id, json);
        }
    }
}
