//! A match server for a money board game. Players connect over WebSocket, create or join a
//! match, and move money between each other, the bank and free parking.

pub mod client;
pub mod config;
pub mod error;
pub mod id;
pub mod lobby;
pub mod match_actor;
pub mod match_state;
pub mod message_relay;
pub mod outbound;
pub mod player;

use crate::lobby::AppState;
use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::services::{ServeDir, ServeFile};

/// Sets up the routing: the web socket, the diagnostic listing and static files for everything else.
pub fn build_app(state: Arc<AppState>) -> Router {
    let web_root = Path::new(&state.config.web_root);
    let static_files =
        ServeDir::new(web_root).not_found_service(ServeFile::new(web_root.join("index.html")));

    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/enlist", get(enlist_handler))
        .with_state(state)
        .fallback_service(static_files)
}

/// Periodically removes matches whose task is gone. This is a fallback, matches normally
/// deregister themselves when they close.
pub fn spawn_watchdog(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.watchdog_interval());
        loop {
            interval.tick().await;
            let removed = state.registry.prune_closed().await;
            if removed > 0 {
                tracing::warn!(removed, "watchdog removed dead matches");
            }
        }
    })
}

/// Upgrades the web response to a web socket.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| message_relay::relay_connection(socket, state))
}

/// Generates a list with the open matches, their stage and how many players and connections they have.
async fn enlist_handler(State(state): State<Arc<AppState>>) -> String {
    state
        .registry
        .describe()
        .await
        .iter()
        .map(|summary| {
            format!(
                "Match: {:<14}  Stage: {:<9} Players: {:03} Connections: {:03}",
                summary.id, summary.stage, summary.players, summary.attached_connections
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
