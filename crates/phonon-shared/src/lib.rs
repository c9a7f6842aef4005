//! # phonon-shared
//!
//! Domain types shared by every Phonon crate: cards, phonons, transfer
//! proposals, denominations and the currency table.  Nothing in here does
//! I/O; the store, client and server crates build on these types.

pub mod card;
pub mod constants;
pub mod currency;
pub mod denomination;
pub mod error;
pub mod types;

pub use card::{Card, Phonon, TransferProposal};
pub use denomination::Denomination;
pub use error::{DenominationError, DeviceError, Recovery};
pub use types::{CardId, Direction, ProposalStatus, ValidationStatus};
