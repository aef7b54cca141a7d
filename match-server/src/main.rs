use match_server::config::ServerConfig;
use match_server::lobby::AppState;
use match_server::{build_app, spawn_watchdog};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
/// Activates tracing, loads the configuration, spawns the watchdog for dead matches and then
/// serves the web socket, the match listing and the static files.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true) // Module path (e.g. match_server::match_actor)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let config = match ServerConfig::load().await {
        Ok(config) => config,
        Err(message) => {
            tracing::error!(message, "Initial load error.");
            std::process::exit(1);
        }
    };

    let app_state = Arc::new(AppState::new(config));
    spawn_watchdog(Arc::clone(&app_state));

    let listen_addr = app_state.config.listen_addr.clone();
    let app = build_app(app_state);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, listen_addr, "Could not bind listener.");
            std::process::exit(1);
        }
    };
    tracing::info!(listen_addr, "match server listening");

    if let Err(error) = axum::serve(listener, app).await {
        tracing::error!(%error, "Server stopped.");
    }
}
