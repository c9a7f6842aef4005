//! Card, phonon and transfer proposal records.
//!
//! Field names on the wire keep the PascalCase spelling the frontend and the
//! persisted `phonon_cards` blob have always used (`CardId`, `ChainID`, ...).

use serde::{Deserialize, Serialize};

use crate::currency;
use crate::denomination::Denomination;
use crate::types::{CardId, Direction, ProposalStatus, ValidationStatus};

// ---------------------------------------------------------------------------
// Phonon
// ---------------------------------------------------------------------------

/// A card-held asset.  `address` is unique within the owning card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Phonon {
    pub address: String,
    #[serde(default)]
    pub address_type: u8,
    #[serde(rename = "ChainID", default)]
    pub chain_id: u32,
    #[serde(default)]
    pub curve_type: u8,
    #[serde(default)]
    pub currency_type: u16,
    #[serde(default)]
    pub denomination: Denomination,
    #[serde(default)]
    pub extended_schema_version: u8,
    #[serde(default)]
    pub key_index: u16,
    /// Public key as a hex string.
    #[serde(default)]
    pub pub_key: String,
    #[serde(default)]
    pub schema_version: u8,

    // transient flags
    #[serde(default)]
    pub proposed_for_transfer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_card_id: Option<CardId>,
    #[serde(default)]
    pub validation_status: ValidationStatus,
}

impl Phonon {
    pub fn new(address: impl Into<String>, currency_type: u16, denomination: Denomination) -> Self {
        Self {
            address: address.into(),
            currency_type,
            denomination,
            ..Self::default()
        }
    }

    pub fn with_chain_id(mut self, chain_id: u32) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_source(mut self, card_id: CardId) -> Self {
        self.source_card_id = Some(card_id);
        self
    }

    /// Amount in whole units of its currency, e.g. `"0.5 ETH"`.
    pub fn display_amount(&self) -> String {
        currency::format_amount(&self.denomination, self.currency_type)
    }

    pub fn with_pub_key(mut self, key: &[u8]) -> Self {
        self.pub_key = hex::encode(key);
        self
    }

    pub fn pub_key_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(self.pub_key.trim_start_matches("0x"))
    }

    /// Drop per-session state before persisting or handing to another card.
    pub fn clear_transient(&mut self) {
        self.proposed_for_transfer = false;
        self.validation_status = ValidationStatus::Unvalidated;
    }
}

// ---------------------------------------------------------------------------
// Transfer proposal
// ---------------------------------------------------------------------------

/// A staged set of phonons moving into (incoming) or out of (outgoing) a card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase", from = "StoredProposal")]
pub struct TransferProposal {
    pub status: ProposalStatus,
    pub phonons: Vec<Phonon>,
}

/// Older records stored a proposal as a bare phonon array.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredProposal {
    Flat(Vec<Phonon>),
    Object {
        #[serde(rename = "Status", default)]
        status: ProposalStatus,
        #[serde(rename = "Phonons", default)]
        phonons: Vec<Phonon>,
    },
}

impl From<StoredProposal> for TransferProposal {
    fn from(stored: StoredProposal) -> Self {
        match stored {
            StoredProposal::Flat(phonons) => Self {
                status: ProposalStatus::Unvalidated,
                phonons,
            },
            StoredProposal::Object { status, phonons } => Self { status, phonons },
        }
    }
}

impl TransferProposal {
    pub fn is_empty(&self) -> bool {
        self.phonons.is_empty()
    }

    /// Holds phonons or has left the initial state.
    pub fn is_active(&self) -> bool {
        !self.phonons.is_empty() || self.status != ProposalStatus::Unvalidated
    }

    pub fn contains(&self, address: &str) -> bool {
        self.phonons.iter().any(|p| p.address == address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.phonons.iter().map(|p| p.address.as_str())
    }

    /// Union by address; an entry with a known address replaces the old one in place.
    pub fn union(&mut self, phonons: impl IntoIterator<Item = Phonon>) {
        union_by_address(&mut self.phonons, phonons);
    }

    /// Set difference by address.  Returns how many entries were removed.
    pub fn remove(&mut self, addresses: &[String]) -> usize {
        let before = self.phonons.len();
        self.phonons.retain(|p| !addresses.contains(&p.address));
        before - self.phonons.len()
    }

    pub fn reset(&mut self) {
        self.phonons.clear();
        self.status = ProposalStatus::Unvalidated;
    }

    /// Enter `validating`, marking every entry as in flight.
    pub fn begin_validation(&mut self) {
        self.status = ProposalStatus::Validating;
        for phonon in &mut self.phonons {
            phonon.validation_status = ValidationStatus::Validating;
        }
    }

    /// Fold one phonon's validation result into the aggregate status.
    ///
    /// The first failure moves the proposal to `has_errors` and later
    /// successes never clear it.  `validated` is only reached once every
    /// entry is valid.  Results arriving outside `validating`/`has_errors`
    /// (after a reset, say) are ignored.  Returns whether the result was applied.
    pub fn record_validation(&mut self, address: &str, valid: bool) -> bool {
        if !matches!(
            self.status,
            ProposalStatus::Validating | ProposalStatus::HasErrors
        ) {
            return false;
        }
        let Some(phonon) = self.phonons.iter_mut().find(|p| p.address == address) else {
            return false;
        };
        phonon.validation_status = if valid {
            ValidationStatus::Valid
        } else {
            ValidationStatus::NotValid
        };

        self.status = match self.status {
            ProposalStatus::HasErrors => ProposalStatus::HasErrors,
            _ if !valid => ProposalStatus::HasErrors,
            _ if self
                .phonons
                .iter()
                .all(|p| p.validation_status == ValidationStatus::Valid) =>
            {
                ProposalStatus::Validated
            }
            other => other,
        };
        true
    }
}

// ---------------------------------------------------------------------------
// Card
// ---------------------------------------------------------------------------

/// A phonon card, local or paired-remote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Card {
    pub card_id: CardId,
    pub vanity_name: Option<String>,
    pub is_locked: bool,
    pub is_mock: bool,
    pub in_tray: bool,
    pub is_remote: bool,
    pub show_actions: bool,
    pub phonons: Vec<Phonon>,
    pub incoming_transfer_proposal: TransferProposal,
    pub outgoing_transfer_proposal: TransferProposal,
}

impl Default for Card {
    fn default() -> Self {
        Self {
            card_id: CardId::default(),
            vanity_name: None,
            is_locked: true,
            is_mock: false,
            in_tray: false,
            is_remote: false,
            show_actions: true,
            phonons: Vec::new(),
            incoming_transfer_proposal: TransferProposal::default(),
            outgoing_transfer_proposal: TransferProposal::default(),
        }
    }
}

impl Card {
    pub fn new(card_id: impl Into<CardId>) -> Self {
        Self {
            card_id: card_id.into(),
            ..Self::default()
        }
    }

    pub fn mock(card_id: impl Into<CardId>) -> Self {
        Self {
            is_mock: true,
            ..Self::new(card_id)
        }
    }

    pub fn remote(card_id: impl Into<CardId>) -> Self {
        Self {
            is_remote: true,
            ..Self::new(card_id)
        }
    }

    pub fn unlocked(mut self) -> Self {
        self.is_locked = false;
        self
    }

    pub fn with_phonons(mut self, phonons: Vec<Phonon>) -> Self {
        self.phonons = phonons;
        self
    }

    /// Vanity name if set, card id otherwise.
    pub fn display_name(&self) -> &str {
        self.vanity_name.as_deref().unwrap_or(self.card_id.as_str())
    }

    pub fn phonon(&self, address: &str) -> Option<&Phonon> {
        self.phonons.iter().find(|p| p.address == address)
    }

    pub fn proposal(&self, direction: Direction) -> &TransferProposal {
        match direction {
            Direction::Incoming => &self.incoming_transfer_proposal,
            Direction::Outgoing => &self.outgoing_transfer_proposal,
        }
    }

    pub fn proposal_mut(&mut self, direction: Direction) -> &mut TransferProposal {
        match direction {
            Direction::Incoming => &mut self.incoming_transfer_proposal,
            Direction::Outgoing => &mut self.outgoing_transfer_proposal,
        }
    }

    pub fn union_phonons(&mut self, phonons: impl IntoIterator<Item = Phonon>) {
        union_by_address(&mut self.phonons, phonons);
    }

    pub fn remove_phonons(&mut self, addresses: &[String]) -> usize {
        let before = self.phonons.len();
        self.phonons.retain(|p| !addresses.contains(&p.address));
        before - self.phonons.len()
    }

    pub fn set_proposed_flag(&mut self, addresses: &[String], proposed: bool) {
        for phonon in self
            .phonons
            .iter_mut()
            .filter(|p| addresses.contains(&p.address))
        {
            phonon.proposed_for_transfer = proposed;
        }
    }
}

fn union_by_address(target: &mut Vec<Phonon>, incoming: impl IntoIterator<Item = Phonon>) {
    for phonon in incoming {
        match target.iter_mut().find(|p| p.address == phonon.address) {
            Some(existing) => *existing = phonon,
            None => target.push(phonon),
        }
    }
}
