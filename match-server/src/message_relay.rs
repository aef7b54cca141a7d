//! WebSocket plumbing for one connection.
//!
//! Every connection gets a send task that drains its outbound queue into the socket. The
//! receive side runs inline and feeds every text frame to the [`Client`] state machine.
//! The connection ends when the socket is gone or the send task gives up, e.g. because the
//! client reads too slowly. Then the client detaches from its match and the send task is aborted.

use crate::client::Client;
use crate::error::GameError;
use crate::lobby::AppState;
use crate::match_state::ConnectionId;
use crate::outbound::{OUTBOUND_BUFFER_SIZE, Outbound, OutboundReceiver, RecvError};
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Serves one upgraded socket from start to finish.
pub async fn relay_connection(socket: WebSocket, state: Arc<AppState>) {
    let connection = state.next_connection_id();
    tracing::debug!(connection, "connection opened");

    // By splitting, we can send and receive at the same time.
    let (sender, receiver) = socket.split();
    let (outbound, internal_receiver) = Outbound::channel(OUTBOUND_BUFFER_SIZE);
    let mut client = Client::new(connection, Arc::clone(&state.registry), outbound);

    let mut send_task = tokio::spawn(send_logic(sender, internal_receiver, connection));
    let reason = receive_logic(receiver, &mut client, &mut send_task).await;

    client.handle_disconnect().await;
    send_task.abort();
    tracing::info!(connection, reason, "connection closed");
}

/// Feeds incoming frames to the client until the socket ends or the send task stops.
/// The send task is only watched between frames, so a request in flight always finishes
/// before the disconnect is handled.
async fn receive_logic(
    mut receiver: SplitStream<WebSocket>,
    client: &mut Client,
    send_task: &mut JoinHandle<&'static str>,
) -> &'static str {
    loop {
        let state = tokio::select! {
            state = receiver.next() => state,
            result = &mut *send_task => {
                return result.unwrap_or_else(|err| {
                    tracing::error!(?err, "Internal panic in send logic.");
                    "Internal panic in send logic."
                });
            }
        };
        match state {
            Some(Ok(Message::Text(text))) => client.handle_message(text.as_str()).await,
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => client.handle_message(text).await,
                Err(error) => client.report(GameError::MalformedMessage(error.to_string())),
            },
            Some(Ok(Message::Close(_))) => return "Client closed the connection.",
            Some(Ok(_)) => {} // Ping and pong are handled by axum.
            Some(Err(error)) => {
                tracing::debug!(connection = client.connection(), %error, "socket error");
                return "Connection lost.";
            }
            None => return "Connection lost.",
        }
    }
}

/// Writes the events queued for this connection to the socket, in order.
async fn send_logic(
    mut sender: SplitSink<WebSocket, Message>,
    mut internal_receiver: OutboundReceiver,
    connection: ConnectionId,
) -> &'static str {
    loop {
        let event = match internal_receiver.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged) => {
                tracing::warn!(connection, "Outbound queue full, dropping connection.");
                let _ = sender.send(Message::Close(None)).await;
                return "Lagging on outbound queue - client too slow.";
            }
            // The client owns a sender until the very end, so this only happens on shutdown.
            Err(RecvError::Closed) => {
                let _ = sender.send(Message::Close(None)).await;
                return "Internal channel closed.";
            }
        };
        let text = match event.to_json() {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(connection, %error, "Could not serialize event.");
                continue;
            }
        };
        if let Err(error) = sender.send(Message::Text(text.into())).await {
            tracing::debug!(connection, %error, "Error in communication with client endpoint.");
            return "Error in communication with client endpoint.";
        }
    }
}
