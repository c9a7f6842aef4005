use phonon_shared::{CardId, DenominationError, DeviceError, Direction, ProposalStatus};
use phonon_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Card not found: {0}")]
    CardNotFound(CardId),

    #[error("Remote card {0} cannot hold phonons")]
    RemoteCardPhonons(CardId),

    #[error("Card {0} is locked")]
    CardLocked(CardId),

    #[error("Phonon {address} is already proposed on card {card_id} ({direction})")]
    PhononAlreadyProposed {
        address: String,
        card_id: CardId,
        direction: Direction,
    },

    #[error("Phonon {address} is not on card {card_id}")]
    PhononNotOnCard { address: String, card_id: CardId },

    #[error("Cannot {action} a proposal that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: ProposalStatus,
    },

    #[error("Proposal has validation errors; transfer requires an explicit override")]
    ValidationErrorsPresent,

    #[error("Proposal has no phonons")]
    EmptyProposal,

    #[error("Wrong PIN")]
    IncorrectPin,

    #[error("PIN must be {expected} digits")]
    InvalidPin { expected: usize },

    #[error("Card {0} already has a PIN")]
    AlreadyInitialized(CardId),

    #[error("No phonons given to redeem")]
    NothingToRedeem,

    #[error("Mining attempt {0} is still running")]
    MiningActive(String),

    #[error("No mining attempt is running")]
    MiningNotActive,

    #[error("No mining report for attempt {0}")]
    MiningReportNotFound(String),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Denomination error: {0}")]
    Denomination(#[from] DenominationError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
