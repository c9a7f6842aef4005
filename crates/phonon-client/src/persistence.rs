//! Write-behind persistence of the card collection.
//!
//! A background task follows the store's snapshot channel and writes every
//! new version under `phonon_cards`.  Mock cards never reach disk.

use std::sync::{Arc, Mutex, PoisonError};

use phonon_shared::{Card, ProposalStatus, ValidationStatus};
use phonon_store::Database;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::store::{CardStore, Snapshot};

/// Load the stored collection and drop state that does not survive a restart.
///
/// Validation results are re-derived after reload: every phonon goes back to
/// `unvalidated`, and so does every proposal that had not been transferred.
pub fn load_initial_cards(db: &Database) -> Vec<Card> {
    let mut cards = db.load_cards_or_empty();
    cards.retain(|c| !c.is_mock);
    for card in &mut cards {
        for phonon in &mut card.phonons {
            phonon.validation_status = ValidationStatus::Unvalidated;
        }
        for proposal in [
            &mut card.incoming_transfer_proposal,
            &mut card.outgoing_transfer_proposal,
        ] {
            if proposal.status != ProposalStatus::Transferred {
                proposal.status = ProposalStatus::Unvalidated;
            }
            for phonon in &mut proposal.phonons {
                phonon.validation_status = ValidationStatus::Unvalidated;
            }
        }
    }
    tracing::info!(count = cards.len(), "card collection rehydrated");
    cards
}

/// Write `snapshot` without its mock cards.  A collection with nothing left
/// to keep removes the stored record.
pub fn persist_snapshot(db: &Mutex<Database>, snapshot: &Snapshot) -> Result<()> {
    let cards: Vec<Card> = snapshot
        .cards
        .iter()
        .filter(|c| !c.is_mock)
        .cloned()
        .collect();
    let db = db.lock().unwrap_or_else(PoisonError::into_inner);
    if cards.is_empty() {
        db.clear_cards()?;
    } else {
        db.save_cards(&cards)?;
    }
    Ok(())
}

/// Write the current snapshot now.
pub fn flush(store: &dyn CardStore, db: &Mutex<Database>) -> Result<()> {
    persist_snapshot(db, &store.snapshot())
}

/// Persist every snapshot published after this call.  The task ends when
/// the store is dropped.
pub fn spawn_persistence(store: &dyn CardStore, db: Arc<Mutex<Database>>) -> JoinHandle<()> {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        let mut written = rx.borrow_and_update().version;
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.version <= written {
                continue;
            }
            let version = snapshot.version;
            let target = db.clone();
            // SQLite writes stay off the runtime's worker threads
            let outcome =
                tokio::task::spawn_blocking(move || persist_snapshot(&target, &snapshot)).await;
            match outcome {
                Ok(Ok(())) => {
                    written = version;
                    tracing::trace!(version, "card snapshot persisted");
                }
                Ok(Err(e)) => {
                    tracing::error!(version, error = %e, "failed to persist cards");
                }
                Err(e) => {
                    tracing::error!(version, error = %e, "persistence write panicked");
                }
            }
        }
        tracing::debug!("persistence task stopped");
    })
}
