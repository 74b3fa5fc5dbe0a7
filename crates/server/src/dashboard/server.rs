//! axum web server for the live dashboard.
//!
//! `GET /api/status` returns the current [`Status`](super::Status) as JSON.
//! `/ws` pushes a status every 500 ms plus session join/leave events as
//! they happen.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;

use super::{DashboardState, Status};

const PUSH_INTERVAL: Duration = Duration::from_millis(500);

pub fn router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Start the dashboard web server. Runs until the task is dropped.
pub async fn start(state: Arc<DashboardState>, port: u16) {
    let addr = format!("0.0.0.0:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Dashboard failed to bind to {}: {}", addr, e);
            return;
        }
    };
    tracing::info!("Dashboard listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, router(state)).await {
        tracing::error!("Dashboard server error: {}", e);
    }
}

async fn status(State(state): State<Arc<DashboardState>>) -> Json<Status> {
    Json(state.status())
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<DashboardState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<DashboardState>) {
    let mut events = state.registry.subscribe();
    let mut ticker = tokio::time::interval(PUSH_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let msg = serde_json::json!({
                    "type": "status",
                    "data": state.status(),
                });
                if send_json(&mut socket, &msg).await.is_err() {
                    break;
                }
            }

            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                let msg = serde_json::json!({
                    "type": "session",
                    "data": event,
                });
                if send_json(&mut socket, &msg).await.is_err() {
                    break;
                }
            }

            // Drain incoming messages (ping/pong, close).
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }
}

async fn send_json(socket: &mut WebSocket, value: &serde_json::Value) -> Result<(), ()> {
    let text = value.to_string();
    socket.send(Message::Text(text.into())).await.map_err(|_| ())
}
