//! The errors a request can run into. Each one ends up as a single `error` event
//! to the connection that sent the request.

use protocol::StageName;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// The text frame is not a valid request.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The request is not legal for the connection state.
    #[error("cannot handle message {0} in the current connection state")]
    UnsupportedOperation(&'static str),

    /// The request is not legal in the current stage of the match.
    #[error("operation {operation} is not supported in the current stage ({stage})")]
    UnsupportedInStage {
        operation: &'static str,
        stage: StageName,
    },

    /// No open match has this id.
    #[error("match \"{0}\" not found")]
    NotFound(String),

    /// No player of the match has this secret.
    #[error("invalid player secret")]
    InvalidCredential,

    #[error("you cannot pay yourself")]
    SelfPayment,

    #[error("you are broke")]
    Insolvent,

    /// The payee is neither a sink nor a roster index.
    #[error("player {0} not found")]
    PlayerNotFound(i64),

    /// Crediting the amount would exceed the largest representable balance.
    #[error("amount {0} exceeds the balance limit")]
    BalanceOverflow(u64),
}
