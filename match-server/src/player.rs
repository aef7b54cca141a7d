//! A seat in a match.

use crate::id::random_id;
use protocol::{PlayerId, PlayerView};

/// One player of a match. Players are never removed; a player without connections is absent.
#[derive(Debug, Clone)]
pub struct Player {
    /// The index in the roster.
    pub id: PlayerId,
    pub name: String,
    pub balance: u64,
    /// The creator of a match is the bank player.
    pub is_bank: bool,
    /// The credential for `rejoin`.
    pub secret: String,
    /// How many live connections currently represent this player.
    pub attached_connections: u32,
}

impl Player {
    /// Creates a player with a fresh secret and no money.
    pub fn new(id: PlayerId, name: String, is_bank: bool) -> Self {
        Player {
            id,
            name,
            balance: 0,
            is_bank,
            secret: random_id(),
            attached_connections: 0,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.attached_connections == 0
    }

    /// The public fields, without the secret.
    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.id,
            name: self.name.clone(),
            balance: self.balance,
            is_bank: self.is_bank,
            absent: self.is_absent(),
        }
    }
}
