//! Transfer proposal manager.
//!
//! Each card carries one incoming and one outgoing proposal.  This module
//! owns every transition of those proposals and the cancellation of work
//! started on their behalf; the coordinator drives the device and reports
//! back through the `begin_*`/`complete_*` hooks here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use phonon_shared::{
    Card, CardId, Direction, Phonon, ProposalStatus, TransferProposal, ValidationStatus,
};
use tokio::task::AbortHandle;

use crate::error::{ClientError, Result};
use crate::store::CardStore;

type ProposalKey = (CardId, Direction);

pub struct ProposalManager {
    store: Arc<dyn CardStore>,
    in_flight: Mutex<HashMap<ProposalKey, Vec<AbortHandle>>>,
}

impl ProposalManager {
    pub fn new(store: Arc<dyn CardStore>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CardStore> {
        &self.store
    }

    pub fn proposal(&self, card_id: &CardId, direction: Direction) -> Result<TransferProposal> {
        self.store
            .get_card_by_id(card_id)
            .map(|card| card.proposal(direction).clone())
            .ok_or_else(|| ClientError::CardNotFound(card_id.clone()))
    }

    /// Active proposal referencing `address`, on any card.
    pub fn proposal_holding(&self, address: &str) -> Option<(CardId, Direction)> {
        let snapshot = self.store.snapshot();
        snapshot.cards.iter().find_map(|card| {
            Direction::ALL.into_iter().find_map(|dir| {
                let proposal = card.proposal(dir);
                (proposal.status != ProposalStatus::Transferred && proposal.contains(address))
                    .then(|| (card.card_id.clone(), dir))
            })
        })
    }

    // ------------------------------------------------------------------
    // Staging
    // ------------------------------------------------------------------

    /// Union `phonons` into the proposal by address and flag them as proposed.
    ///
    /// A phonon already referenced by any other active proposal is rejected.
    /// Adding to a validated proposal sends it back to `unvalidated`.
    pub fn add_phonons_to_proposal(
        &self,
        card_id: &CardId,
        phonons: Vec<Phonon>,
        direction: Direction,
    ) -> Result<TransferProposal> {
        let mut staged = None;
        self.store.update_all(&mut |cards| {
            let target = position(cards, card_id)?;
            let status = cards[target].proposal(direction).status;
            if status.is_in_flight() || status == ProposalStatus::Transferred {
                return Err(ClientError::InvalidTransition {
                    action: "add phonons to",
                    status,
                });
            }

            for phonon in &phonons {
                if let Some((owner, dir)) = proposed_elsewhere(cards, &phonon.address, card_id, direction) {
                    return Err(ClientError::PhononAlreadyProposed {
                        address: phonon.address.clone(),
                        card_id: owner,
                        direction: dir,
                    });
                }
                // a card can only send what it holds
                if direction == Direction::Outgoing && cards[target].phonon(&phonon.address).is_none() {
                    return Err(ClientError::PhononNotOnCard {
                        address: phonon.address.clone(),
                        card_id: card_id.clone(),
                    });
                }
            }

            let mut entries = Vec::with_capacity(phonons.len());
            for phonon in &phonons {
                let mut entry = phonon.clone();
                entry.proposed_for_transfer = true;
                if entry.source_card_id.is_none() {
                    entry.source_card_id = holder_of(cards, &entry.address);
                }
                entries.push(entry);
            }
            let addresses: Vec<String> = entries.iter().map(|p| p.address.clone()).collect();
            set_owner_flags(cards, &addresses, true);

            let proposal = cards[target].proposal_mut(direction);
            proposal.union(entries);
            if matches!(
                proposal.status,
                ProposalStatus::Validated | ProposalStatus::HasErrors
            ) {
                proposal.status = ProposalStatus::Unvalidated;
            }
            staged = Some(proposal.clone());
            Ok(())
        })?;

        tracing::debug!(card_id = %card_id, %direction, "phonons staged for transfer");
        staged.ok_or_else(|| ClientError::CardNotFound(card_id.clone()))
    }

    /// Inverse of [`ProposalManager::add_phonons_to_proposal`].
    pub fn remove_phonons_from_proposal(
        &self,
        card_id: &CardId,
        addresses: &[String],
        direction: Direction,
    ) -> Result<TransferProposal> {
        let mut remaining = None;
        self.store.update_all(&mut |cards| {
            let target = position(cards, card_id)?;
            let status = cards[target].proposal(direction).status;
            if status.is_in_flight() {
                return Err(ClientError::InvalidTransition {
                    action: "remove phonons from",
                    status,
                });
            }
            let proposal = cards[target].proposal_mut(direction);
            let removed: Vec<String> = addresses
                .iter()
                .filter(|a| proposal.contains(a))
                .cloned()
                .collect();
            proposal.remove(&removed);
            if proposal.is_empty() {
                proposal.status = ProposalStatus::Unvalidated;
            }
            remaining = Some(proposal.clone());
            set_owner_flags(cards, &removed, false);
            Ok(())
        })?;
        remaining.ok_or_else(|| ClientError::CardNotFound(card_id.clone()))
    }

    /// Empty the proposal and return it to `unvalidated`, cancelling any
    /// validation or transfer still running for it.  Owned phonons are untouched.
    pub fn reset_proposal(&self, card_id: &CardId, direction: Direction) -> Result<()> {
        self.clear_proposal(card_id, direction, false)?;
        tracing::debug!(card_id = %card_id, %direction, "proposal reset");
        Ok(())
    }

    /// Reset the proposal and take the card out of the tray.
    /// Not available once a transfer has started.
    pub fn decline_proposal(&self, card_id: &CardId, direction: Direction) -> Result<()> {
        self.clear_proposal(card_id, direction, true)?;
        tracing::info!(card_id = %card_id, %direction, "proposal declined");
        Ok(())
    }

    /// The registry lock is held across the store update so that work
    /// registered by a transition that lands after this one is never aborted.
    fn clear_proposal(&self, card_id: &CardId, direction: Direction, decline: bool) -> Result<()> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.update_all(&mut |cards| {
            let target = position(cards, card_id)?;
            let status = cards[target].proposal(direction).status;
            if decline && !status.can_decline() {
                return Err(ClientError::InvalidTransition {
                    action: "decline",
                    status,
                });
            }
            let addresses: Vec<String> = cards[target]
                .proposal(direction)
                .addresses()
                .map(str::to_string)
                .collect();
            cards[target].proposal_mut(direction).reset();
            if decline {
                cards[target].in_tray = false;
            }
            set_owner_flags(cards, &addresses, false);
            Ok(())
        })?;
        let handles = in_flight
            .remove(&(card_id.clone(), direction))
            .unwrap_or_default();
        drop(in_flight);
        abort_all(card_id, direction, handles);
        Ok(())
    }

    /// Set the status directly.  Never moves phonons between cards.
    pub fn update_proposal_status(
        &self,
        card_id: &CardId,
        direction: Direction,
        status: ProposalStatus,
    ) -> Result<()> {
        self.store.update_card(card_id, &mut |card| {
            card.proposal_mut(direction).status = status;
            Ok(())
        })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Coordinator hooks
    // ------------------------------------------------------------------

    /// `unvalidated -> validating`.  Returns the phonons to validate.
    pub fn begin_validation(&self, card_id: &CardId, direction: Direction) -> Result<Vec<Phonon>> {
        let card = self.store.update_card(card_id, &mut |card| {
            let proposal = card.proposal_mut(direction);
            if proposal.status != ProposalStatus::Unvalidated {
                return Err(ClientError::InvalidTransition {
                    action: "validate",
                    status: proposal.status,
                });
            }
            if proposal.is_empty() {
                return Err(ClientError::EmptyProposal);
            }
            proposal.begin_validation();
            Ok(())
        })?;
        Ok(card.proposal(direction).phonons.clone())
    }

    /// Fold one validation result in.  Returns the aggregate status afterwards.
    pub fn record_validation(
        &self,
        card_id: &CardId,
        direction: Direction,
        address: &str,
        valid: bool,
    ) -> Result<ProposalStatus> {
        let card = self.store.update_card(card_id, &mut |card| {
            card.proposal_mut(direction).record_validation(address, valid);
            Ok(())
        })?;
        Ok(card.proposal(direction).status)
    }

    /// Set one entry's status.  `valid`/`not_valid` are folded into the
    /// aggregate like a device answer; the other values only touch the entry.
    pub fn set_phonon_validation_status(
        &self,
        card_id: &CardId,
        direction: Direction,
        address: &str,
        status: ValidationStatus,
    ) -> Result<ProposalStatus> {
        match status {
            ValidationStatus::Valid => self.record_validation(card_id, direction, address, true),
            ValidationStatus::NotValid => self.record_validation(card_id, direction, address, false),
            ValidationStatus::Unvalidated | ValidationStatus::Validating => {
                let card = self.store.update_card(card_id, &mut |card| {
                    let proposal = card.proposal_mut(direction);
                    if let Some(entry) = proposal.phonons.iter_mut().find(|p| p.address == address) {
                        entry.validation_status = status;
                    }
                    Ok(())
                })?;
                Ok(card.proposal(direction).status)
            }
        }
    }

    /// `validated -> transferring`, or `has_errors -> transferring` when
    /// `ignore_validation` is set.  Returns the phonons to transfer.
    pub fn begin_transfer(
        &self,
        card_id: &CardId,
        direction: Direction,
        ignore_validation: bool,
    ) -> Result<Vec<Phonon>> {
        let card = self.store.update_card(card_id, &mut |card| {
            let proposal = card.proposal_mut(direction);
            match proposal.status {
                ProposalStatus::Validated => {}
                ProposalStatus::HasErrors if ignore_validation => {
                    tracing::warn!(card_id = %card_id, "transfer accepted despite validation errors");
                }
                ProposalStatus::HasErrors => return Err(ClientError::ValidationErrorsPresent),
                status => {
                    return Err(ClientError::InvalidTransition {
                        action: "transfer",
                        status,
                    })
                }
            }
            if proposal.is_empty() {
                return Err(ClientError::EmptyProposal);
            }
            proposal.status = ProposalStatus::Transferring;
            Ok(())
        })?;
        Ok(card.proposal(direction).phonons.clone())
    }

    /// Leave `transferring` after a failed or timed out transfer.
    ///
    /// The proposal goes back to `has_errors` if any entry failed validation,
    /// so an override transfer that failed still needs the override next time.
    /// Returns the status afterwards.
    pub fn fail_transfer(&self, card_id: &CardId, direction: Direction) -> Result<ProposalStatus> {
        let card = self.store.update_card(card_id, &mut |card| {
            let proposal = card.proposal_mut(direction);
            if proposal.status == ProposalStatus::Transferring {
                let errors = proposal
                    .phonons
                    .iter()
                    .any(|p| p.validation_status == ValidationStatus::NotValid);
                proposal.status = if errors {
                    ProposalStatus::HasErrors
                } else {
                    ProposalStatus::Validated
                };
            }
            Ok(())
        })?;
        Ok(card.proposal(direction).status)
    }

    /// `transferring -> transferred`, moving ownership of the phonons.
    ///
    /// Incoming: the phonons join the receiving card and leave their local
    /// source card, if any.  Outgoing: they leave the sending card.  The
    /// proposal keeps its entries until it is reset.
    pub fn complete_transfer(&self, card_id: &CardId, direction: Direction) -> Result<usize> {
        let mut moved = 0;
        self.store.update_all(&mut |cards| {
            let target = position(cards, card_id)?;
            let status = cards[target].proposal(direction).status;
            if status != ProposalStatus::Transferring {
                return Err(ClientError::InvalidTransition {
                    action: "complete",
                    status,
                });
            }
            let phonons = cards[target].proposal(direction).phonons.clone();
            let addresses: Vec<String> = phonons.iter().map(|p| p.address.clone()).collect();
            moved = phonons.len();

            match direction {
                Direction::Incoming => {
                    for phonon in &phonons {
                        if let Some(source) = &phonon.source_card_id {
                            if source != card_id {
                                if let Some(card) = cards.iter_mut().find(|c| &c.card_id == source) {
                                    card.remove_phonons(std::slice::from_ref(&phonon.address));
                                }
                            }
                        }
                    }
                    let receiver = &mut cards[target];
                    if !receiver.is_remote {
                        receiver.union_phonons(phonons.into_iter().map(|mut p| {
                            p.clear_transient();
                            p.source_card_id = None;
                            p
                        }));
                    }
                }
                Direction::Outgoing => {
                    cards[target].remove_phonons(&addresses);
                }
            }

            cards[target].proposal_mut(direction).status = ProposalStatus::Transferred;
            Ok(())
        })?;
        self.clear_in_flight(card_id, direction);
        tracing::info!(card_id = %card_id, %direction, moved, "transfer completed");
        Ok(moved)
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Tie a spawned task to the proposal so resetting it aborts the task.
    pub fn register_in_flight(&self, card_id: &CardId, direction: Direction, handle: AbortHandle) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let handles = in_flight
            .entry((card_id.clone(), direction))
            .or_default();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    pub fn cancel_in_flight(&self, card_id: &CardId, direction: Direction) -> usize {
        let handles = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(card_id.clone(), direction))
            .unwrap_or_default();
        abort_all(card_id, direction, handles)
    }

    /// Abort everything; used on session teardown.
    pub fn cancel_all(&self) {
        let all: Vec<ProposalKey> = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for (card_id, direction) in all {
            self.cancel_in_flight(&card_id, direction);
        }
    }

    fn clear_in_flight(&self, card_id: &CardId, direction: Direction) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(card_id.clone(), direction));
    }
}

fn abort_all(card_id: &CardId, direction: Direction, handles: Vec<AbortHandle>) -> usize {
    let mut cancelled = 0;
    for handle in handles {
        if !handle.is_finished() {
            handle.abort();
            cancelled += 1;
        }
    }
    if cancelled > 0 {
        tracing::info!(card_id = %card_id, %direction, cancelled, "cancelled in-flight proposal work");
    }
    cancelled
}

fn position(cards: &[Card], card_id: &CardId) -> Result<usize> {
    cards
        .iter()
        .position(|c| &c.card_id == card_id)
        .ok_or_else(|| ClientError::CardNotFound(card_id.clone()))
}

/// Active proposal, other than `(card_id, direction)`, referencing `address`.
fn proposed_elsewhere(
    cards: &[Card],
    address: &str,
    card_id: &CardId,
    direction: Direction,
) -> Option<(CardId, Direction)> {
    cards.iter().find_map(|card| {
        Direction::ALL.into_iter().find_map(|dir| {
            let same_slot = &card.card_id == card_id && dir == direction;
            let proposal = card.proposal(dir);
            (!same_slot && proposal.status != ProposalStatus::Transferred && proposal.contains(address))
                .then(|| (card.card_id.clone(), dir))
        })
    })
}

fn holder_of(cards: &[Card], address: &str) -> Option<CardId> {
    cards
        .iter()
        .find(|c| c.phonon(address).is_some())
        .map(|c| c.card_id.clone())
}

fn set_owner_flags(cards: &mut [Card], addresses: &[String], proposed: bool) {
    for card in cards.iter_mut() {
        card.set_proposed_flag(addresses, proposed);
    }
}
