//! The authoritative state of one match and its stage state machine.
//!
//! ```text
//! [Preparing] --begin--> [Playing] --only one solvent player left--> [End]
//! ```
//!
//! Every method runs synchronously and either fully applies or returns an error before
//! touching anything. The match actor is the only owner, so calls never interleave.
//! Events are pushed straight into the outbound queues of the attached connections.

use crate::error::GameError;
use crate::outbound::Outbound;
use crate::player::Player;
use protocol::{
    Handshake, MatchSnapshot, Party, Payment, PlayerId, Request, Rules, ServerEvent, StageName,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// Identifies one transport connection for the lifetime of the process.
pub type ConnectionId = u64;

/// The stages of a match with their stage local data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Preparing,
    Playing {
        /// When the match closes if nobody attaches until then.
        close_deadline: Option<Instant>,
    },
    End,
}

impl Stage {
    fn name(&self) -> StageName {
        match self {
            Stage::Preparing => StageName::Preparing,
            Stage::Playing { .. } => StageName::Playing,
            Stage::End => StageName::End,
        }
    }
}

/// A connection currently attached to the match.
#[derive(Debug)]
struct Attachment {
    player: PlayerId,
    outbound: Outbound,
}

/// What has to happen with the match after a connection detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// The match stays open (possibly with a pending close deadline).
    Open,
    /// The match has to be closed now.
    Close,
}

/// Compact description for the diagnostic listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSummary {
    pub id: String,
    pub stage: StageName,
    pub players: usize,
    pub attached_connections: usize,
}

/// One running match.
#[derive(Debug)]
pub struct Match {
    id: String,
    stage: Stage,
    players: Vec<Player>,
    free_parking_balance: u64,
    rules: Rules,
    history: Vec<Payment>,
    connections: BTreeMap<ConnectionId, Attachment>,
    /// How long a playing match survives without any attached connection.
    grace_period: Duration,
}

impl Match {
    pub fn new(id: String, rules: Rules, grace_period: Duration) -> Self {
        Match {
            id,
            stage: Stage::Preparing,
            players: Vec::new(),
            free_parking_balance: 0,
            rules,
            history: Vec::new(),
            connections: BTreeMap::new(),
            grace_period,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stage(&self) -> StageName {
        self.stage.name()
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn free_parking_balance(&self) -> u64 {
        self.free_parking_balance
    }

    pub fn history(&self) -> &[Payment] {
        &self.history
    }

    pub fn attached_connections(&self) -> usize {
        self.connections.len()
    }

    /// The pending close deadline, only ever set while playing.
    pub fn close_deadline(&self) -> Option<Instant> {
        match self.stage {
            Stage::Playing { close_deadline } => close_deadline,
            _ => None,
        }
    }

    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            id: self.id.clone(),
            stage: self.stage(),
            players: self.players.len(),
            attached_connections: self.connections.len(),
        }
    }

    /// Appends a new player bound to `connection`, announces it and completes the handshake.
    pub fn join(
        &mut self,
        connection: ConnectionId,
        outbound: Outbound,
        name: String,
        is_bank: bool,
    ) -> PlayerId {
        let id = self.players.len() as PlayerId;
        let mut player = Player::new(id, name, is_bank);
        player.attached_connections = 1;
        let view = player.view();
        self.players.push(player);

        // The new connection is not attached yet, so it does not see its own join.
        self.broadcast(ServerEvent::Join(view));
        self.insert_connection(connection, id, outbound);
        self.complete_handshake(connection, id);
        tracing::debug!(match_id = %self.id, player = id, is_bank, "player joined");
        id
    }

    /// Binds `connection` to the player owning `secret` and completes the handshake.
    pub fn rejoin(
        &mut self,
        connection: ConnectionId,
        outbound: Outbound,
        secret: &str,
    ) -> Result<PlayerId, GameError> {
        let id = self
            .players
            .iter()
            .find(|player| player.secret == secret)
            .map(|player| player.id)
            .ok_or(GameError::InvalidCredential)?;

        let player = &mut self.players[id as usize];
        player.attached_connections += 1;
        if player.attached_connections == 1 {
            self.broadcast(ServerEvent::Absent { id, value: false });
        }
        self.insert_connection(connection, id, outbound);
        self.complete_handshake(connection, id);
        tracing::debug!(match_id = %self.id, player = id, "player rejoined");
        Ok(id)
    }

    /// Removes `connection` from the match.
    pub fn detach(&mut self, connection: ConnectionId) -> Detached {
        let Some(attachment) = self.connections.remove(&connection) else {
            tracing::warn!(match_id = %self.id, connection, "detach of unknown connection");
            return Detached::Open;
        };

        let id = attachment.player;
        let player = &mut self.players[id as usize];
        player.attached_connections -= 1;
        if player.attached_connections == 0 {
            self.broadcast(ServerEvent::Absent { id, value: true });
        }

        if !self.connections.is_empty() {
            return Detached::Open;
        }
        match &mut self.stage {
            Stage::Playing { close_deadline } => {
                *close_deadline = Some(Instant::now() + self.grace_period);
                tracing::info!(
                    match_id = %self.id,
                    grace_period = ?self.grace_period,
                    "last connection left a running game, closing after grace period"
                );
                Detached::Open
            }
            Stage::Preparing | Stage::End => Detached::Close,
        }
    }

    /// Executes an in-game request on behalf of the player attached as `connection`.
    pub fn handle(&mut self, connection: ConnectionId, request: Request) -> Result<(), GameError> {
        let caller = self
            .connections
            .get(&connection)
            .map(|attachment| attachment.player)
            .ok_or(GameError::UnsupportedOperation(request.name()))?;

        match self.stage {
            Stage::Preparing => self.handle_preparing(request),
            Stage::Playing { .. } => self.handle_playing(caller, request),
            Stage::End => Err(self.unsupported(&request)),
        }
    }

    fn handle_preparing(&mut self, request: Request) -> Result<(), GameError> {
        match request {
            Request::Begin {} => {
                for player in &mut self.players {
                    player.balance = self.rules.initial_balance;
                }
                self.stage = Stage::Playing {
                    close_deadline: None,
                };
                self.broadcast(ServerEvent::Begin {});
                tracing::info!(match_id = %self.id, players = self.players.len(), "game began");
                Ok(())
            }
            other => Err(self.unsupported(&other)),
        }
    }

    fn handle_playing(&mut self, caller: PlayerId, request: Request) -> Result<(), GameError> {
        match request {
            Request::Pay { to, amount } => self.pay(caller, to, amount),
            Request::Take { amount } => {
                let player = &mut self.players[caller as usize];
                player.balance = credit(player.balance, amount)?;
                self.submit_payment(Party::Bank, Party::Player(caller), amount);
                Ok(())
            }
            Request::TakeFreeParking {} => {
                let amount = self.free_parking_balance;
                if amount > 0 {
                    let player = &mut self.players[caller as usize];
                    player.balance = credit(player.balance, amount)?;
                    self.free_parking_balance = 0;
                    self.submit_payment(Party::FreeParking, Party::Player(caller), amount);
                }
                Ok(())
            }
            other => Err(self.unsupported(&other)),
        }
    }

    fn pay(&mut self, caller: PlayerId, to: i64, amount: u64) -> Result<(), GameError> {
        if to == i64::from(caller) {
            return Err(GameError::SelfPayment);
        }
        let balance = self.players[caller as usize].balance;
        if balance == 0 {
            return Err(GameError::Insolvent);
        }
        let payee = self.resolve_payee(to)?;

        // The receiving side is credited first, a failed credit leaves the payer untouched.
        let actual_amount = balance.min(amount);
        match payee {
            Party::FreeParking => {
                self.free_parking_balance = credit(self.free_parking_balance, actual_amount)?;
            }
            Party::Bank => {}
            Party::Player(id) => {
                let receiver = &mut self.players[id as usize];
                receiver.balance = credit(receiver.balance, actual_amount)?;
            }
        }
        self.players[caller as usize].balance -= actual_amount;

        self.submit_payment(Party::Player(caller), payee, actual_amount);
        Ok(())
    }

    /// Maps a wire id to a sink or a player of this match.
    fn resolve_payee(&self, to: i64) -> Result<Party, GameError> {
        match Party::try_from(to) {
            Ok(Party::Player(id)) if id as usize >= self.players.len() => {
                Err(GameError::PlayerNotFound(to))
            }
            Ok(party) => Ok(party),
            Err(_) => Err(GameError::PlayerNotFound(to)),
        }
    }

    /// Records a payment, tells everybody, then checks if the game is over.
    fn submit_payment(&mut self, from: Party, to: Party, amount: u64) {
        let payment = Payment { from, to, amount };
        self.history.push(payment);
        self.broadcast(ServerEvent::Pay(payment));

        let solvent = self
            .players
            .iter()
            .filter(|player| player.balance > 0)
            .count();
        if solvent <= 1 {
            self.stage = Stage::End;
            tracing::info!(match_id = %self.id, "game ended");
        }
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot {
            id: self.id.clone(),
            stage: self.stage(),
            players: self.players.iter().map(Player::view).collect(),
            free_parking_balance: self.free_parking_balance,
            rules: self.rules,
            history: self.history.clone(),
        }
    }

    fn insert_connection(&mut self, connection: ConnectionId, player: PlayerId, outbound: Outbound) {
        self.connections
            .insert(connection, Attachment { player, outbound });
        if let Stage::Playing { close_deadline } = &mut self.stage {
            if close_deadline.take().is_some() {
                tracing::info!(match_id = %self.id, "pending close cancelled");
            }
        }
    }

    fn complete_handshake(&self, connection: ConnectionId, player: PlayerId) {
        let Some(attachment) = self.connections.get(&connection) else {
            return;
        };
        let handshake = Handshake {
            player_id: player,
            player_secret: self.players[player as usize].secret.clone(),
            snapshot: self.snapshot(),
        };
        if !attachment.outbound.send(ServerEvent::Handshake(handshake)) {
            tracing::debug!(match_id = %self.id, connection, "handshake not delivered");
        }
    }

    /// Sends an event to every attached connection.
    fn broadcast(&self, event: ServerEvent) {
        for (connection, attachment) in &self.connections {
            // A closed or lagging queue belongs to a connection whose detach is on its way.
            if !attachment.outbound.send(event.clone()) {
                tracing::trace!(match_id = %self.id, connection, "dropping event for gone connection");
            }
        }
    }

    fn unsupported(&self, request: &Request) -> GameError {
        GameError::UnsupportedInStage {
            operation: request.name(),
            stage: self.stage(),
        }
    }
}

/// Adds `amount` to a balance, refusing instead of losing money on overflow.
fn credit(balance: u64, amount: u64) -> Result<u64, GameError> {
    balance
        .checked_add(amount)
        .ok_or(GameError::BalanceOverflow(amount))
}
