use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use match_server::build_app;
use match_server::config::ServerConfig;
use match_server::lobby::AppState;
use protocol::{Handshake, ServerEvent};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with the default configuration.
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    /// Start a test server whose running games close one second after the last connection left.
    pub async fn with_short_grace_period() -> Self {
        let config = ServerConfig {
            grace_period_secs: 1,
            ..ServerConfig::default()
        };
        Self::from_config(config).await
    }

    async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(AppState::new(config));
        let app = build_app(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Send a raw text frame.
pub async fn ws_send_text(stream: &mut WsStream, text: &str) {
    stream
        .send(Message::Text(text.to_string().into()))
        .await
        .unwrap();
}

/// Send a request given as `name` and JSON `parameters`.
pub async fn ws_send_request(stream: &mut WsStream, name: &str, parameters: serde_json::Value) {
    let text = serde_json::json!({ "name": name, "parameters": parameters }).to_string();
    ws_send_text(stream, &text).await;
}

/// Read the next event, skipping control frames. Panics after two seconds of silence.
pub async fn ws_read_event(stream: &mut WsStream) -> ServerEvent {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("Timed out waiting for event")
            .expect("Stream ended")
            .expect("WebSocket error");
        match message {
            Message::Text(text) => return ServerEvent::from_json(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected text frame, got: {other:?}"),
        }
    }
}

/// Read the next event and require it to be the handshake.
pub async fn ws_read_handshake(stream: &mut WsStream) -> Handshake {
    match ws_read_event(stream).await {
        ServerEvent::Handshake(handshake) => handshake,
        other => panic!("Expected handshake, got: {other:?}"),
    }
}

/// Read the next event and require it to be an error. Returns its message.
pub async fn ws_read_error(stream: &mut WsStream) -> String {
    match ws_read_event(stream).await {
        ServerEvent::Error { message } => message,
        other => panic!("Expected error, got: {other:?}"),
    }
}

/// Create a match as `name`. Returns the handshake.
pub async fn ws_create_match(stream: &mut WsStream, name: &str) -> Handshake {
    ws_send_request(stream, "create", serde_json::json!({ "name": name })).await;
    ws_read_handshake(stream).await
}

/// Join `match_id` as `name`. Returns the handshake.
pub async fn ws_join_match(stream: &mut WsStream, match_id: &str, name: &str) -> Handshake {
    ws_send_request(
        stream,
        "join",
        serde_json::json!({ "matchId": match_id, "name": name }),
    )
    .await;
    ws_read_handshake(stream).await
}

/// Poll until `match_id` is gone from the registry.
pub async fn wait_until_closed(server: &TestServer, match_id: &str) {
    for _ in 0..300 {
        if server.state.registry.find_match(match_id).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Match {match_id} was never closed");
}
