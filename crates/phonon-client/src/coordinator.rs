//! Drives validation and transfer of proposals against the device channel.

use std::sync::Arc;
use std::time::Duration;

use phonon_shared::constants::{DEFAULT_TRANSFER_TIMEOUT_MS, DEFAULT_VALIDATION_TIMEOUT_MS};
use phonon_shared::{CardId, DeviceError, Direction, Phonon, ProposalStatus};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::activity::ActivityLog;
use crate::device::DeviceChannel;
use crate::error::{ClientError, Result};
use crate::events::{
    emit_event, PhononValidatedPayload, ProposalStatusPayload, SessionEvent,
    TransferCompletedPayload, TransferFailedPayload,
};
use crate::proposal::ProposalManager;

pub struct TransferCoordinator<D: DeviceChannel> {
    device: Arc<D>,
    proposals: Arc<ProposalManager>,
    activity: ActivityLog,
    events: broadcast::Sender<SessionEvent>,
    validation_timeout: Duration,
    transfer_timeout: Duration,
}

impl<D: DeviceChannel> Clone for TransferCoordinator<D> {
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            proposals: self.proposals.clone(),
            activity: self.activity.clone(),
            events: self.events.clone(),
            validation_timeout: self.validation_timeout,
            transfer_timeout: self.transfer_timeout,
        }
    }
}

impl<D: DeviceChannel> TransferCoordinator<D> {
    pub fn new(
        device: Arc<D>,
        proposals: Arc<ProposalManager>,
        activity: ActivityLog,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            device,
            proposals,
            activity,
            events,
            validation_timeout: Duration::from_millis(DEFAULT_VALIDATION_TIMEOUT_MS),
            transfer_timeout: Duration::from_millis(DEFAULT_TRANSFER_TIMEOUT_MS),
        }
    }

    /// Per-phonon validation timeout and whole-transfer timeout.
    pub fn with_timeouts(mut self, validation: Duration, transfer: Duration) -> Self {
        self.validation_timeout = validation;
        self.transfer_timeout = transfer;
        self
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Validate every phonon in the proposal and wait for the outcome.
    ///
    /// Each phonon is checked by its own task; results are folded in as they
    /// arrive, so the first invalid answer flips the proposal to `has_errors`
    /// immediately.  Returns `Cancelled` if the proposal was reset meanwhile.
    pub async fn validate(&self, card_id: &CardId, direction: Direction) -> Result<ProposalStatus> {
        let phonons = self.proposals.begin_validation(card_id, direction)?;
        self.status_changed(card_id, direction, ProposalStatus::Validating);
        self.run_validation(card_id.clone(), direction, phonons).await
    }

    /// Like [`TransferCoordinator::validate`], but runs in the background.
    /// The state transition happens before this returns.
    pub fn start_validation(
        &self,
        card_id: &CardId,
        direction: Direction,
    ) -> Result<JoinHandle<Result<ProposalStatus>>> {
        let phonons = self.proposals.begin_validation(card_id, direction)?;
        self.status_changed(card_id, direction, ProposalStatus::Validating);

        let this = self.clone();
        let owned = card_id.clone();
        let handle =
            tokio::spawn(async move { this.run_validation(owned, direction, phonons).await });
        self.proposals
            .register_in_flight(card_id, direction, handle.abort_handle());
        Ok(handle)
    }

    async fn run_validation(
        &self,
        card_id: CardId,
        direction: Direction,
        phonons: Vec<Phonon>,
    ) -> Result<ProposalStatus> {
        tracing::info!(card_id = %card_id, %direction, count = phonons.len(), "validating proposal");

        let mut handles = Vec::with_capacity(phonons.len());
        for phonon in phonons {
            let this = self.clone();
            let card = card_id.clone();
            let handle = tokio::spawn(async move { this.validate_one(card, direction, phonon).await });
            self.proposals
                .register_in_flight(&card_id, direction, handle.abort_handle());
            handles.push(handle);
        }

        for joined in futures::future::join_all(handles).await {
            if let Err(e) = joined {
                if e.is_cancelled() {
                    return Err(ClientError::Cancelled);
                }
                tracing::error!(card_id = %card_id, error = %e, "validation task panicked");
            }
        }

        let status = self.proposals.proposal(&card_id, direction)?.status;
        match status {
            ProposalStatus::Validated => {
                self.activity
                    .record_success(format!("Phonons validated on card {}", card_id.short()));
            }
            ProposalStatus::HasErrors => {
                self.activity.record_error(format!(
                    "Some phonons on card {} failed validation",
                    card_id.short()
                ));
            }
            // reset while the last results were landing
            _ => return Err(ClientError::Cancelled),
        }
        self.status_changed(&card_id, direction, status);
        Ok(status)
    }

    async fn validate_one(&self, card_id: CardId, direction: Direction, phonon: Phonon) {
        let answer = timeout(
            self.validation_timeout,
            self.device.validate_phonon(&card_id, &phonon),
        )
        .await;
        let valid = match answer {
            Ok(Ok(valid)) => valid,
            Ok(Err(e)) => {
                tracing::warn!(card_id = %card_id, address = %phonon.address, error = %e, "device error during validation");
                self.activity
                    .record_error(format!("Could not validate phonon {}: {e}", phonon.address));
                false
            }
            Err(_) => {
                let e = DeviceError::Timeout {
                    operation: "validate",
                    after_ms: self.validation_timeout.as_millis() as u64,
                };
                tracing::warn!(card_id = %card_id, address = %phonon.address, "validation timed out");
                self.activity
                    .record_error(format!("Could not validate phonon {}: {e}", phonon.address));
                false
            }
        };

        match self
            .proposals
            .record_validation(&card_id, direction, &phonon.address, valid)
        {
            Ok(_) => emit_event(
                &self.events,
                SessionEvent::PhononValidated(PhononValidatedPayload {
                    card_id,
                    direction,
                    address: phonon.address,
                    valid,
                }),
            ),
            Err(e) => {
                tracing::warn!(card_id = %card_id, error = %e, "dropping validation result");
            }
        }
    }

    // ------------------------------------------------------------------
    // Transfer
    // ------------------------------------------------------------------

    /// Transfer a validated proposal.  `ignore_validation` allows a proposal
    /// with validation errors through.  Returns the number of phonons moved.
    ///
    /// On failure or timeout the proposal goes back to `validated`, or to
    /// `has_errors` if it was let through with errors, and the error is
    /// returned as well as recorded.
    pub async fn transfer(
        &self,
        card_id: &CardId,
        direction: Direction,
        ignore_validation: bool,
    ) -> Result<usize> {
        let phonons = self
            .proposals
            .begin_transfer(card_id, direction, ignore_validation)?;
        self.status_changed(card_id, direction, ProposalStatus::Transferring);
        self.run_transfer(card_id.clone(), direction, phonons).await
    }

    pub fn start_transfer(
        &self,
        card_id: &CardId,
        direction: Direction,
        ignore_validation: bool,
    ) -> Result<JoinHandle<Result<usize>>> {
        let phonons = self
            .proposals
            .begin_transfer(card_id, direction, ignore_validation)?;
        self.status_changed(card_id, direction, ProposalStatus::Transferring);

        let this = self.clone();
        let owned = card_id.clone();
        let handle = tokio::spawn(async move { this.run_transfer(owned, direction, phonons).await });
        self.proposals
            .register_in_flight(card_id, direction, handle.abort_handle());
        Ok(handle)
    }

    async fn run_transfer(
        &self,
        card_id: CardId,
        direction: Direction,
        phonons: Vec<Phonon>,
    ) -> Result<usize> {
        tracing::info!(card_id = %card_id, %direction, count = phonons.len(), "transferring proposal");

        let outcome = match timeout(
            self.transfer_timeout,
            self.device.transfer(&card_id, direction, &phonons),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Timeout {
                operation: "transfer",
                after_ms: self.transfer_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(()) => {
                let moved = self.proposals.complete_transfer(&card_id, direction)?;
                self.activity.record_success(format!(
                    "Transferred {moved} phonon(s) on card {}",
                    card_id.short()
                ));
                emit_event(
                    &self.events,
                    SessionEvent::TransferCompleted(TransferCompletedPayload {
                        card_id: card_id.clone(),
                        direction,
                        moved,
                    }),
                );
                self.status_changed(&card_id, direction, ProposalStatus::Transferred);
                Ok(moved)
            }
            Err(e) => {
                tracing::error!(card_id = %card_id, %direction, error = %e, recovery = ?e.recovery(), "transfer failed");
                let status = self.proposals.fail_transfer(&card_id, direction)?;
                self.activity.record_error(format!(
                    "Transfer on card {} failed: {e}",
                    card_id.short()
                ));
                emit_event(
                    &self.events,
                    SessionEvent::TransferFailed(TransferFailedPayload {
                        card_id: card_id.clone(),
                        direction,
                        error: e.to_string(),
                    }),
                );
                self.status_changed(&card_id, direction, status);
                Err(e.into())
            }
        }
    }

    fn status_changed(&self, card_id: &CardId, direction: Direction, status: ProposalStatus) {
        emit_event(
            &self.events,
            SessionEvent::ProposalStatusChanged(ProposalStatusPayload {
                card_id: card_id.clone(),
                direction,
                status,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::device::{SimulatedDevice, ValidationPolicy};
    use crate::events::event_channel;
    use crate::store::{CardStore, MemoryCardStore};
    use phonon_shared::{Card, Denomination};
    use phonon_store::{ActivityKind, Database};

    const CARD_A: &str = "04e0d5eb884a73cf";
    const CARD_B: &str = "04e0d5eb884a73ce";

    struct Harness {
        store: Arc<MemoryCardStore>,
        proposals: Arc<ProposalManager>,
        device: Arc<SimulatedDevice>,
        activity: ActivityLog,
        events: broadcast::Sender<SessionEvent>,
        coordinator: TransferCoordinator<SimulatedDevice>,
    }

    fn phonon(address: &str) -> Phonon {
        Phonon::new(address, 2, Denomination::parse("1000000000000000000").unwrap()).with_chain_id(1)
    }

    fn harness(device: SimulatedDevice) -> Harness {
        let store = Arc::new(MemoryCardStore::new());
        store.add_cards(vec![
            Card::new(CARD_A)
                .unlocked()
                .with_phonons(vec![phonon("0xp1"), phonon("0xp2")]),
            Card::new(CARD_B).unlocked(),
        ]);
        let proposals = Arc::new(ProposalManager::new(store.clone()));
        let device = Arc::new(device);
        let events = event_channel();
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let activity = ActivityLog::new(db, events.clone());
        let coordinator = TransferCoordinator::new(
            device.clone(),
            proposals.clone(),
            activity.clone(),
            events.clone(),
        );
        Harness {
            store,
            proposals,
            device,
            activity,
            events,
            coordinator,
        }
    }

    fn stage_incoming(h: &Harness) -> CardId {
        let b = CardId::from(CARD_B);
        let phonons = h.store.get_card_by_id(&CARD_A.into()).unwrap().phonons;
        h.proposals
            .add_phonons_to_proposal(&b, phonons, Direction::Incoming)
            .unwrap();
        b
    }

    #[tokio::test]
    async fn validate_then_transfer_moves_phonons() {
        let h = harness(SimulatedDevice::instant());
        let b = stage_incoming(&h);

        let status = h.coordinator.validate(&b, Direction::Incoming).await.unwrap();
        assert_eq!(status, ProposalStatus::Validated);

        let moved = h
            .coordinator
            .transfer(&b, Direction::Incoming, false)
            .await
            .unwrap();
        assert_eq!(moved, 2);
        assert_eq!(h.store.get_card_by_id(&b).unwrap().phonons.len(), 2);
        assert!(h.store.get_card_by_id(&CARD_A.into()).unwrap().phonons.is_empty());
        assert_eq!(h.activity.history().last().unwrap().kind, ActivityKind::Success);
    }

    #[tokio::test]
    async fn first_failure_flips_before_later_successes() {
        let device = SimulatedDevice::instant().with_policy(ValidationPolicy::Scripted(
            HashMap::from([("0xp2".to_string(), false)]),
        ));
        device.set_validation_delay("0xp1", Duration::from_millis(100));
        let h = harness(device);
        let mut rx = h.events.subscribe();
        let b = stage_incoming(&h);

        let status = h.coordinator.validate(&b, Direction::Incoming).await.unwrap();
        assert_eq!(status, ProposalStatus::HasErrors);

        let mut answers = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::PhononValidated(p) = event {
                answers.push((p.address, p.valid));
            }
        }
        assert_eq!(
            answers,
            vec![("0xp2".to_string(), false), ("0xp1".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn late_failure_still_wins() {
        let device = SimulatedDevice::instant().with_policy(ValidationPolicy::Scripted(
            HashMap::from([("0xp1".to_string(), false)]),
        ));
        device.set_validation_delay("0xp1", Duration::from_millis(50));
        let h = harness(device);
        let b = stage_incoming(&h);

        let status = h.coordinator.validate(&b, Direction::Incoming).await.unwrap();
        assert_eq!(status, ProposalStatus::HasErrors);

        let proposal = h.proposals.proposal(&b, Direction::Incoming).unwrap();
        assert_eq!(
            proposal.phonons[0].validation_status,
            phonon_shared::ValidationStatus::NotValid
        );
        assert_eq!(
            proposal.phonons[1].validation_status,
            phonon_shared::ValidationStatus::Valid
        );
    }

    #[tokio::test]
    async fn device_error_counts_as_invalid() {
        let h = harness(SimulatedDevice::instant());
        let b = stage_incoming(&h);
        h.device.set_connected(&b, false);

        let status = h.coordinator.validate(&b, Direction::Incoming).await.unwrap();
        assert_eq!(status, ProposalStatus::HasErrors);
        assert!(h
            .activity
            .history()
            .iter()
            .any(|e| e.kind == ActivityKind::Error && e.message.contains("0xp1")));
    }

    #[tokio::test]
    async fn reset_cancels_running_validation() {
        let device = SimulatedDevice::new(Duration::from_secs(3600), Duration::ZERO)
            .with_policy(ValidationPolicy::AlwaysValid);
        let h = harness(device);
        let b = stage_incoming(&h);

        let handle = h.coordinator.start_validation(&b, Direction::Incoming).unwrap();
        tokio::task::yield_now().await;
        h.proposals.reset_proposal(&b, Direction::Incoming).unwrap();

        let joined = handle.await;
        assert!(matches!(joined, Err(ref e) if e.is_cancelled())
            || matches!(joined, Ok(Err(ClientError::Cancelled))));
        let proposal = h.proposals.proposal(&b, Direction::Incoming).unwrap();
        assert_eq!(proposal.status, ProposalStatus::Unvalidated);
        assert!(proposal.is_empty());
    }

    #[tokio::test]
    async fn transfer_timeout_returns_to_validated() {
        let device = SimulatedDevice::new(Duration::ZERO, Duration::from_secs(3600))
            .with_policy(ValidationPolicy::AlwaysValid);
        let mut h = harness(device);
        h.coordinator = h
            .coordinator
            .clone()
            .with_timeouts(Duration::from_secs(1), Duration::from_millis(20));
        let b = stage_incoming(&h);
        h.coordinator.validate(&b, Direction::Incoming).await.unwrap();

        let err = h
            .coordinator
            .transfer(&b, Direction::Incoming, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Device(DeviceError::Timeout { operation: "transfer", .. })
        ));
        let proposal = h.proposals.proposal(&b, Direction::Incoming).unwrap();
        assert_eq!(proposal.status, ProposalStatus::Validated);
        assert_eq!(proposal.phonons.len(), 2);
        assert_eq!(h.store.get_card_by_id(&CARD_A.into()).unwrap().phonons.len(), 2);
        assert_eq!(h.activity.history().last().unwrap().kind, ActivityKind::Error);
    }

    #[tokio::test]
    async fn device_transfer_failure_is_surfaced() {
        let h = harness(SimulatedDevice::instant());
        let b = stage_incoming(&h);
        h.coordinator.validate(&b, Direction::Incoming).await.unwrap();
        h.device.fail_transfers_with(Some(DeviceError::ConnectionLost));
        let mut rx = h.events.subscribe();

        assert!(h
            .coordinator
            .transfer(&b, Direction::Incoming, false)
            .await
            .is_err());
        let mut failed = false;
        while let Ok(event) = rx.try_recv() {
            failed |= matches!(event, SessionEvent::TransferFailed(_));
        }
        assert!(failed);
    }

    #[tokio::test]
    async fn errors_need_override_to_transfer() {
        let device = SimulatedDevice::instant().with_policy(ValidationPolicy::Scripted(
            HashMap::from([("0xp1".to_string(), false)]),
        ));
        let h = harness(device);
        let b = stage_incoming(&h);
        h.coordinator.validate(&b, Direction::Incoming).await.unwrap();

        let err = h
            .coordinator
            .transfer(&b, Direction::Incoming, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ValidationErrorsPresent));

        let handle = h
            .coordinator
            .start_transfer(&b, Direction::Incoming, true)
            .unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_override_transfer_still_needs_override() {
        let device = SimulatedDevice::instant().with_policy(ValidationPolicy::Scripted(
            HashMap::from([("0xp1".to_string(), false)]),
        ));
        let h = harness(device);
        let b = stage_incoming(&h);
        assert_eq!(
            h.coordinator.validate(&b, Direction::Incoming).await.unwrap(),
            ProposalStatus::HasErrors
        );

        h.device.fail_transfers_with(Some(DeviceError::ConnectionLost));
        assert!(h
            .coordinator
            .transfer(&b, Direction::Incoming, true)
            .await
            .is_err());
        assert_eq!(
            h.proposals.proposal(&b, Direction::Incoming).unwrap().status,
            ProposalStatus::HasErrors
        );

        h.device.fail_transfers_with(None);
        let err = h
            .coordinator
            .transfer(&b, Direction::Incoming, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ValidationErrorsPresent));
        assert_eq!(h.store.get_card_by_id(&CARD_A.into()).unwrap().phonons.len(), 2);
        assert!(h.store.get_card_by_id(&b).unwrap().phonons.is_empty());
    }
}
