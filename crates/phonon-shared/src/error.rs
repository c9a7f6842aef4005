use thiserror::Error;

use crate::types::CardId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DenominationError {
    #[error("Denomination is empty")]
    Empty,

    #[error("Denomination contains a non-digit character: {0:?}")]
    InvalidDigit(char),

    #[error("Value cannot be represented as a phonon denomination: {0}")]
    NotRepresentable(String),

    #[error("Denomination exceeds representable precision")]
    ExceedsPrecision,
}

/// What a caller should do after a [`DeviceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The operation may be attempted again as-is.
    Retry,
    /// Show the error to the user; retrying without their input is pointless.
    SurfaceToUser,
    /// The operation cannot succeed against this card.
    Fatal,
}

/// Failures talking to a card.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Connection to card lost")]
    ConnectionLost,

    #[error("Card did not answer {operation} within {after_ms} ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    #[error("Malformed response from card: {0}")]
    MalformedResponse(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Card {0} is not connected")]
    CardNotConnected(CardId),

    #[error("Card {0} already has a PIN")]
    AlreadyInitialized(CardId),
}

impl DeviceError {
    pub fn recovery(&self) -> Recovery {
        match self {
            DeviceError::ConnectionLost | DeviceError::Timeout { .. } => Recovery::Retry,
            DeviceError::MalformedResponse(_)
            | DeviceError::Unauthorized(_)
            | DeviceError::AlreadyInitialized(_) => Recovery::SurfaceToUser,
            DeviceError::CardNotConnected(_) => Recovery::Fatal,
        }
    }
}
