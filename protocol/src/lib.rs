//! The messages exchanged between the match server and its clients.
//! Every frame is a JSON text message of the shape `{"name": ..., "parameters": {...}}`,
//! in both directions. Requests flow Client -> Server, events flow Server -> Client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The wire id of the bank sink. Money paid to the bank vanishes, money taken from it is minted.
pub const BANK_ID: i64 = -1;

/// The wire id of the free parking pool.
pub const FREE_PARKING_ID: i64 = -2;

/// The index of a player in the roster of its match.
pub type PlayerId = u32;

/// One side of a payment: a player seat or one of the two sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Party {
    /// A player, addressed by roster index.
    Player(PlayerId),
    /// The bank, an unbounded source and sink.
    Bank,
    /// The shared free parking pool.
    FreeParking,
}

impl From<Party> for i64 {
    fn from(party: Party) -> Self {
        match party {
            Party::Player(id) => i64::from(id),
            Party::Bank => BANK_ID,
            Party::FreeParking => FREE_PARKING_ID,
        }
    }
}

impl TryFrom<i64> for Party {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            BANK_ID => Ok(Party::Bank),
            FREE_PARKING_ID => Ok(Party::FreeParking),
            _ => PlayerId::try_from(value)
                .map(Party::Player)
                .map_err(|_| format!("{value} is neither a player nor a sink id")),
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Player(id) => write!(f, "player {id}"),
            Party::Bank => write!(f, "bank"),
            Party::FreeParking => write!(f, "free parking"),
        }
    }
}

/// The house rules of a match. They are fixed once the match is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rules {
    /// The balance every player receives when the game begins.
    pub initial_balance: u64,
    /// House rule flag shown to clients; the server treats free parking the same either way.
    pub lucky_free_parking: bool,
}

impl Default for Rules {
    fn default() -> Self {
        Rules {
            initial_balance: 1500,
            lucky_free_parking: false,
        }
    }
}

/// A recorded transfer in the ledger history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub from: Party,
    pub to: Party,
    pub amount: u64,
}

/// The stage names as they appear in the match snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Preparing,
    Playing,
    End,
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageName::Preparing => "preparing",
            StageName::Playing => "playing",
            StageName::End => "end",
        };
        f.pad(name)
    }
}

/// The public fields of a player, as seen by everybody in the match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub balance: u64,
    pub is_bank: bool,
    /// True if no connection currently represents this player.
    pub absent: bool,
}

/// The complete state of a match, enough for a client to resynchronize from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    pub id: String,
    pub stage: StageName,
    pub players: Vec<PlayerView>,
    pub free_parking_balance: u64,
    pub rules: Rules,
    pub history: Vec<Payment>,
}

/// The response that completes `join`, `rejoin` and `create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub player_id: PlayerId,
    /// The credential for a later `rejoin`. Never reissued.
    pub player_secret: String,
    #[serde(rename = "match")]
    pub snapshot: MatchSnapshot,
}

/// Requests a client can send. Which ones are legal depends on the connection and match state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "name",
    content = "parameters",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    /// Join an existing match as a new player.
    Join { match_id: String, name: String },
    /// Attach to an existing player of a match with its secret.
    Rejoin { match_id: String, secret: String },
    /// Open a new match and join it as the bank player.
    Create {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rules: Option<Rules>,
    },
    /// Detach from the current match.
    Leave {},
    /// Hand out the starting balances and start playing.
    Begin {},
    /// Pay a player or a sink. Capped at the own balance. `to` is a roster index,
    /// [`BANK_ID`] or [`FREE_PARKING_ID`]; anything else is rejected by the match.
    Pay { to: i64, amount: u64 },
    /// Receive money from the bank.
    Take { amount: u64 },
    /// Collect the complete free parking pool.
    TakeFreeParking {},
}

impl Request {
    /// Parses and validates a raw text frame. The error describes what is wrong with it.
    pub fn from_json(text: &str) -> Result<Request, String> {
        let request: Request = serde_json::from_str(text).map_err(|error| error.to_string())?;
        request.validate()?;
        Ok(request)
    }

    /// Checks the constraints serde can not express.
    fn validate(&self) -> Result<(), String> {
        match self {
            Request::Join { name, .. } | Request::Create { name, .. } if name.trim().is_empty() => {
                Err("player name must not be empty".into())
            }
            Request::Join { match_id, .. } | Request::Rejoin { match_id, .. }
                if match_id.is_empty() =>
            {
                Err("match id must not be empty".into())
            }
            _ => Ok(()),
        }
    }

    /// The name of the request as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Join { .. } => "join",
            Request::Rejoin { .. } => "rejoin",
            Request::Create { .. } => "create",
            Request::Leave {} => "leave",
            Request::Begin {} => "begin",
            Request::Pay { .. } => "pay",
            Request::Take { .. } => "take",
            Request::TakeFreeParking {} => "takeFreeParking",
        }
    }
}

/// Events the server pushes to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "parameters", rename_all = "camelCase")]
pub enum ServerEvent {
    /// The handshake completed.
    #[serde(rename = "ok")]
    Handshake(Handshake),
    /// The last request was rejected. Nothing changed.
    Error { message: String },
    /// A new player joined the match.
    Join(PlayerView),
    /// A player lost its last connection (`value == true`) or got one back.
    Absent { id: PlayerId, value: bool },
    /// The game started, all balances are reset to the initial balance.
    Begin {},
    /// A payment was recorded.
    Pay(Payment),
    /// The connection left its match.
    Left {},
}

impl ServerEvent {
    /// Encodes the event as a text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a text frame, used by clients.
    pub fn from_json(text: &str) -> Result<ServerEvent, serde_json::Error> {
        serde_json::from_str(text)
    }
}
