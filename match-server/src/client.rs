//! The per-connection state machine. It does the handshake that binds a connection to a player
//! of a match, and afterwards forwards the in-game requests to that match.
//!
//! ```text
//! [Connected] --join / rejoin / create--> [Joined] --leave--> [Connected]
//! ```
//!
//! Every error ends up as one `error` event to this connection and leaves the state as it was.

use crate::error::GameError;
use crate::lobby::SessionRegistry;
use crate::match_actor::MatchHandle;
use crate::match_state::ConnectionId;
use crate::outbound::Outbound;
use protocol::{PlayerId, Request, ServerEvent};
use std::sync::Arc;

/// Where the connection currently stands.
#[derive(Debug, Clone)]
pub enum ClientState {
    /// Not part of any match.
    Connected,
    /// Attached to a match as one of its players.
    Joined { handle: MatchHandle, player: PlayerId },
}

pub struct Client {
    connection: ConnectionId,
    registry: Arc<SessionRegistry>,
    /// The events for this connection, also handed to the match on attach.
    outbound: Outbound,
    state: ClientState,
}

impl Client {
    pub fn new(connection: ConnectionId, registry: Arc<SessionRegistry>, outbound: Outbound) -> Self {
        Client {
            connection,
            registry,
            outbound,
            state: ClientState::Connected,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    /// Handles one raw text frame.
    pub async fn handle_message(&mut self, text: &str) {
        let result = match Request::from_json(text) {
            Ok(request) => self.handle(request).await,
            Err(description) => Err(GameError::MalformedMessage(description)),
        };
        if let Err(error) = result {
            self.report(error);
        }
    }

    /// Sends `error` back to this connection.
    pub fn report(&self, error: GameError) {
        tracing::debug!(connection = self.connection, %error, "request rejected");
        self.send(ServerEvent::Error {
            message: error.to_string(),
        });
    }

    pub async fn handle(&mut self, request: Request) -> Result<(), GameError> {
        match self.state {
            ClientState::Connected => self.handle_connected(request).await,
            ClientState::Joined { .. } => self.handle_joined(request).await,
        }
    }

    async fn handle_connected(&mut self, request: Request) -> Result<(), GameError> {
        let (handle, player) = match request {
            Request::Join { match_id, name } => {
                let handle = self.registry.find_match(&match_id).await?;
                let player = handle
                    .join(self.connection, self.outbound.clone(), name, false)
                    .await?;
                (handle, player)
            }
            Request::Rejoin { match_id, secret } => {
                let handle = self.registry.find_match(&match_id).await?;
                let player = handle
                    .rejoin(self.connection, self.outbound.clone(), secret)
                    .await?;
                (handle, player)
            }
            Request::Create { name, rules } => {
                let handle = self.registry.create_match(rules).await;
                let player = handle
                    .join(self.connection, self.outbound.clone(), name, true)
                    .await?;
                (handle, player)
            }
            other => return Err(GameError::UnsupportedOperation(other.name())),
        };

        tracing::info!(
            connection = self.connection,
            match_id = %handle.id(),
            player,
            "connection joined match"
        );
        self.state = ClientState::Joined { handle, player };
        Ok(())
    }

    async fn handle_joined(&mut self, request: Request) -> Result<(), GameError> {
        let ClientState::Joined { handle, .. } = &self.state else {
            return Err(GameError::UnsupportedOperation(request.name()));
        };

        match request {
            Request::Leave {} => {
                handle.detach(self.connection).await;
                tracing::info!(connection = self.connection, match_id = %handle.id(), "connection left match");
                self.state = ClientState::Connected;
                self.send(ServerEvent::Left {});
                Ok(())
            }
            other => handle.handle(self.connection, other).await,
        }
    }

    /// The transport is gone. Detaches like `leave`, but there is nobody left to answer.
    pub async fn handle_disconnect(self) {
        if let ClientState::Joined { handle, player } = self.state {
            tracing::debug!(
                connection = self.connection,
                match_id = %handle.id(),
                player,
                "detaching disconnected connection"
            );
            handle.detach(self.connection).await;
        }
    }

    fn send(&self, event: ServerEvent) {
        if !self.outbound.send(event) {
            tracing::trace!(connection = self.connection, "outbound queue closed or full");
        }
    }
}
