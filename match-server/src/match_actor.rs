//! Every match runs as its own tokio task that owns the [`Match`] and applies commands one at a
//! time in arrival order. This makes each command atomic against the match, while different
//! matches run fully in parallel.
//!
//! The task ends when the match closes: immediately when the last connection leaves outside of a
//! running game, or when the grace period of a running game elapses without anybody attaching.
//! Commands still queued at that point are dropped and their callers see [`GameError::NotFound`].
//! The detach that closed the match is answered by the owner of the task, after the match is
//! deregistered, so the caller never sees a closed match that can still be found.

use crate::error::GameError;
use crate::match_state::{ConnectionId, Detached, Match, MatchSummary};
use crate::outbound::Outbound;
use protocol::{PlayerId, Request};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};

/// The buffer size of the command queue of one match.
pub const CHANNEL_BUFFER_SIZE: usize = 256;

/// The commands a match actor accepts. Every command carries its reply channel.
pub enum MatchCommand {
    Join {
        connection: ConnectionId,
        outbound: Outbound,
        name: String,
        is_bank: bool,
        reply: oneshot::Sender<PlayerId>,
    },
    Rejoin {
        connection: ConnectionId,
        outbound: Outbound,
        secret: String,
        reply: oneshot::Sender<Result<PlayerId, GameError>>,
    },
    Handle {
        connection: ConnectionId,
        request: Request,
        reply: oneshot::Sender<Result<(), GameError>>,
    },
    Detach {
        connection: ConnectionId,
        reply: oneshot::Sender<()>,
    },
    Describe {
        reply: oneshot::Sender<MatchSummary>,
    },
}

/// A cloneable reference to a running match.
#[derive(Clone, Debug)]
pub struct MatchHandle {
    id: Arc<str>,
    sender: mpsc::Sender<MatchCommand>,
}

impl MatchHandle {
    pub fn new(id: &str, sender: mpsc::Sender<MatchCommand>) -> Self {
        MatchHandle {
            id: Arc::from(id),
            sender,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True once the actor is gone.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Sends a command and waits for its reply. A closed match looks like a missing one.
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> MatchCommand,
    ) -> Result<T, GameError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| GameError::NotFound(self.id.to_string()))?;
        response
            .await
            .map_err(|_| GameError::NotFound(self.id.to_string()))
    }

    /// Adds a new player for `connection`. The handshake goes out through `outbound`.
    pub async fn join(
        &self,
        connection: ConnectionId,
        outbound: Outbound,
        name: String,
        is_bank: bool,
    ) -> Result<PlayerId, GameError> {
        self.request(|reply| MatchCommand::Join {
            connection,
            outbound,
            name,
            is_bank,
            reply,
        })
        .await
    }

    /// Attaches `connection` to the player owning `secret`.
    pub async fn rejoin(
        &self,
        connection: ConnectionId,
        outbound: Outbound,
        secret: String,
    ) -> Result<PlayerId, GameError> {
        self.request(|reply| MatchCommand::Rejoin {
            connection,
            outbound,
            secret,
            reply,
        })
        .await?
    }

    /// Forwards an in-game request.
    pub async fn handle(&self, connection: ConnectionId, request: Request) -> Result<(), GameError> {
        self.request(|reply| MatchCommand::Handle {
            connection,
            request,
            reply,
        })
        .await?
    }

    /// Detaches `connection` and waits until it is done. A closed match has nothing to detach.
    pub async fn detach(&self, connection: ConnectionId) {
        if let Err(error) = self
            .request(|reply| MatchCommand::Detach { connection, reply })
            .await
        {
            tracing::debug!(match_id = %self.id, connection, %error, "detach from closed match");
        }
    }

    pub async fn describe(&self) -> Option<MatchSummary> {
        self.request(|reply| MatchCommand::Describe { reply })
            .await
            .ok()
    }
}

/// The reply of the detach that closed the match, still to be answered.
pub type PendingDetach = Option<oneshot::Sender<()>>;

/// Runs the match until it closes.
pub async fn run(mut state: Match, mut commands: mpsc::Receiver<MatchCommand>) -> PendingDetach {
    let mut pending = None;
    loop {
        let deadline = state.close_deadline();
        let command = tokio::select! {
            // Commands win over an expiring deadline, so an attach that arrived in time always counts.
            biased;
            command = commands.recv() => command,
            _ = wait_for(deadline) => {
                tracing::info!(match_id = %state.id(), "grace period elapsed without connections");
                break;
            }
        };

        let Some(command) = command else {
            break;
        };
        if let Some(reply) = apply(&mut state, command) {
            pending = Some(reply);
            break;
        }
    }
    tracing::info!(match_id = %state.id(), "match closed");
    pending
}

/// Sleeps until `deadline`, or forever if there is none.
async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Applies one command. A caller that went away in the meantime does not stop the command.
/// Returns the unanswered reply if the command closed the match.
fn apply(state: &mut Match, command: MatchCommand) -> PendingDetach {
    match command {
        MatchCommand::Join {
            connection,
            outbound,
            name,
            is_bank,
            reply,
        } => {
            let _ = reply.send(state.join(connection, outbound, name, is_bank));
        }
        MatchCommand::Rejoin {
            connection,
            outbound,
            secret,
            reply,
        } => {
            let _ = reply.send(state.rejoin(connection, outbound, &secret));
        }
        MatchCommand::Handle {
            connection,
            request,
            reply,
        } => {
            let _ = reply.send(state.handle(connection, request));
        }
        MatchCommand::Detach { connection, reply } => match state.detach(connection) {
            Detached::Open => {
                let _ = reply.send(());
            }
            Detached::Close => return Some(reply),
        },
        MatchCommand::Describe { reply } => {
            let _ = reply.send(state.summary());
        }
    }
    None
}
