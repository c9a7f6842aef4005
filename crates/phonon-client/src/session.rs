//! Application session.
//!
//! A [`Session`] is built once per run and owns everything with a lifetime:
//! the card store, the proposal manager, the transfer coordinator, the
//! settings, the activity log and the persistence task.  Must be created
//! inside a tokio runtime.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use phonon_shared::constants::{MAX_MINING_DIFFICULTY, MOCK_CARD_ID_PREFIX, PIN_LENGTH};
use phonon_shared::{
    Card, CardId, Denomination, DeviceError, Direction, Phonon, ProposalStatus, TransferProposal,
};
use phonon_store::{ActivityEntry, ConfigurableSettings, Database};
use rand::Rng;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::activity::ActivityLog;
use crate::config::ClientConfig;
use crate::coordinator::TransferCoordinator;
use crate::device::{DeviceChannel, RedeemedPhonon, SimulatedDevice};
use crate::error::{ClientError, Result};
use crate::events::{emit_event, event_channel, CardPayload, SessionEvent};
use crate::mining::{Miner, MiningReport};
use crate::persistence;
use crate::proposal::ProposalManager;
use crate::store::{CardStore, MemoryCardStore, Snapshot};

pub struct Session<D: DeviceChannel = SimulatedDevice> {
    store: Arc<dyn CardStore>,
    db: Arc<Mutex<Database>>,
    proposals: Arc<ProposalManager>,
    coordinator: TransferCoordinator<D>,
    miner: Miner<D>,
    activity: ActivityLog,
    events: broadcast::Sender<SessionEvent>,
    settings: Mutex<ConfigurableSettings>,
    persistence: Mutex<Option<JoinHandle<()>>>,
    config: ClientConfig,
}

impl Session<SimulatedDevice> {
    /// Open the configured database and start a session on the simulated device.
    pub fn open(config: ClientConfig) -> Result<Self> {
        let db = config.open_database()?;
        let device = Arc::new(config.simulated_device());
        let session = Self::with_device(db, device, config);
        if session.config.auto_mock {
            session.create_mock_card()?;
        }
        Ok(session)
    }
}

fn check_pin(pin: &str) -> Result<()> {
    if pin.len() != PIN_LENGTH || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ClientError::InvalidPin {
            expected: PIN_LENGTH,
        });
    }
    Ok(())
}

impl<D: DeviceChannel> Session<D> {
    /// Rehydrate cards from `db` into a fresh in-memory store.
    pub fn with_device(db: Database, device: Arc<D>, config: ClientConfig) -> Self {
        let cards = persistence::load_initial_cards(&db);
        let store: Arc<dyn CardStore> = Arc::new(MemoryCardStore::with_cards(cards));
        Self::with_store(store, db, device, config)
    }

    /// Run on top of an existing store.  Cards already in it are kept.
    pub fn with_store(
        store: Arc<dyn CardStore>,
        db: Database,
        device: Arc<D>,
        config: ClientConfig,
    ) -> Self {
        let settings = db.load_settings();
        let db = Arc::new(Mutex::new(db));
        let events = event_channel();
        let activity = ActivityLog::new(db.clone(), events.clone());
        let proposals = Arc::new(ProposalManager::new(store.clone()));
        let miner = Miner::new(device.clone(), store.clone(), activity.clone());
        let coordinator =
            TransferCoordinator::new(device, proposals.clone(), activity.clone(), events.clone())
                .with_timeouts(config.validation_timeout, config.transfer_timeout);
        let persistence = persistence::spawn_persistence(store.as_ref(), db.clone());

        tracing::info!(
            cards = store.snapshot().cards.len(),
            auto_validate = settings.auto_validate_incoming_phonon_requests,
            "session started"
        );

        Self {
            store,
            db,
            proposals,
            coordinator,
            miner,
            activity,
            events,
            settings: Mutex::new(settings),
            persistence: Mutex::new(Some(persistence)),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn CardStore> {
        &self.store
    }

    pub fn device(&self) -> &Arc<D> {
        self.coordinator.device()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.store.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Cards
    // ------------------------------------------------------------------

    pub fn cards(&self) -> Vec<Card> {
        self.store.cards()
    }

    pub fn card(&self, card_id: &CardId) -> Result<Card> {
        self.store
            .get_card_by_id(card_id)
            .ok_or_else(|| ClientError::CardNotFound(card_id.clone()))
    }

    pub fn add_cards(&self, cards: Vec<Card>) {
        self.store.add_cards(cards);
    }

    /// Remove cards, cancelling any work still running for their proposals.
    pub fn remove_cards(&self, ids: &[CardId]) {
        for id in ids {
            for direction in Direction::ALL {
                self.proposals.cancel_in_flight(id, direction);
            }
        }
        self.store.remove_cards(ids);
    }

    pub fn add_phonons_to_card(&self, card_id: &CardId, phonons: Vec<Phonon>) -> Result<Card> {
        self.store.add_phonons_to_card(card_id, phonons)
    }

    pub fn remove_phonons_from_card(&self, card_id: &CardId, addresses: &[String]) -> Result<Card> {
        self.store.remove_phonons_from_card(card_id, addresses)
    }

    pub fn reset_phonons_on_card(&self, card_id: &CardId) -> Result<Card> {
        self.store.reset_phonons_on_card(card_id)
    }

    /// Add a locked mock card with a random id under the mock prefix.
    pub fn create_mock_card(&self) -> Result<Card> {
        let existing = self.store.snapshot();
        let mut rng = rand::thread_rng();
        let card_id = loop {
            let candidate = CardId::new(format!(
                "{MOCK_CARD_ID_PREFIX}{:03}",
                rng.gen_range(0..1000u16)
            ));
            if existing.card(&candidate).is_none() {
                break candidate;
            }
        };
        let card = Card::mock(card_id.clone());
        self.store.add_cards(vec![card.clone()]);
        self.activity
            .record_success(format!("Mock card {} created", card_id));
        tracing::info!(card_id = %card_id, "mock card created");
        Ok(card)
    }

    /// Present `pin` to the card.  A rejected PIN is `IncorrectPin`; there
    /// is no lockout.
    pub async fn unlock_card(&self, card_id: &CardId, pin: &str) -> Result<Card> {
        check_pin(pin)?;
        let card = self.card(card_id)?;

        match self.device_call("unlock", self.device().unlock(card_id, pin)).await {
            Ok(()) => {}
            Err(DeviceError::Unauthorized(reason)) => {
                tracing::info!(card_id = %card_id, %reason, "unlock rejected");
                self.activity
                    .record_error(format!("Incorrect PIN for card {}", card.display_name()));
                return Err(ClientError::IncorrectPin);
            }
            Err(e) => {
                self.activity
                    .record_error(format!("Could not unlock card {}: {e}", card.display_name()));
                return Err(e.into());
            }
        }

        let card = self.store.update_card(card_id, &mut |card| {
            card.is_locked = false;
            Ok(())
        })?;
        self.activity
            .record_success(format!("Card {} unlocked", card.display_name()));
        emit_event(
            &self.events,
            SessionEvent::CardUnlocked(CardPayload {
                card_id: card_id.clone(),
            }),
        );
        Ok(card)
    }

    /// Give a factory-fresh card its first PIN.  The card stays locked
    /// until it is unlocked with that PIN.
    pub async fn init_card(&self, card_id: &CardId, pin: &str) -> Result<()> {
        check_pin(pin)?;
        let card = self.card(card_id)?;

        match self.device_call("init", self.device().init_card(card_id, pin)).await {
            Ok(()) => {}
            Err(DeviceError::AlreadyInitialized(id)) => {
                return Err(ClientError::AlreadyInitialized(id));
            }
            Err(e) => {
                self.activity.record_error(format!(
                    "Could not initialize card {}: {e}",
                    card.display_name()
                ));
                return Err(e.into());
            }
        }
        self.activity
            .record_success(format!("Card {} initialized", card.display_name()));
        tracing::info!(card_id = %card_id, "card PIN initialized");
        Ok(())
    }

    /// Lock the card; a locked card also leaves the tray.
    pub fn lock_card(&self, card_id: &CardId) -> Result<Card> {
        self.store.update_card(card_id, &mut |card| {
            card.is_locked = true;
            card.in_tray = false;
            Ok(())
        })
    }

    /// Blank names clear the vanity name.
    pub fn set_vanity_name(&self, card_id: &CardId, name: Option<String>) -> Result<Card> {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self.store.update_card(card_id, &mut |card| {
            card.vanity_name = name.clone();
            Ok(())
        })
    }

    pub fn set_in_tray(&self, card_id: &CardId, in_tray: bool) -> Result<Card> {
        self.store.update_card(card_id, &mut |card| {
            if in_tray && card.is_locked {
                return Err(ClientError::CardLocked(card.card_id.clone()));
            }
            card.in_tray = in_tray;
            Ok(())
        })
    }

    /// Forget every card.  The persisted collection follows.
    pub fn clear_cards(&self) {
        self.proposals.cancel_all();
        self.store.clear();
        tracing::info!("card collection cleared");
    }

    // ------------------------------------------------------------------
    // Phonon lifecycle
    // ------------------------------------------------------------------

    /// Create a phonon on an unlocked local card.  The denomination must fit
    /// the card's compressed form.
    pub async fn create_phonon(
        &self,
        card_id: &CardId,
        currency_type: u16,
        denomination: Denomination,
    ) -> Result<Phonon> {
        let card = self.unlocked_local_card(card_id)?;
        denomination.to_parts()?;

        let phonon = match self
            .device_call(
                "create phonon",
                self.device().create_phonon(card_id, currency_type, &denomination),
            )
            .await
        {
            Ok(phonon) => phonon,
            Err(e) => {
                self.activity.record_error(format!(
                    "Could not create phonon on card {}: {e}",
                    card.display_name()
                ));
                return Err(e.into());
            }
        };
        self.store.add_phonons_to_card(card_id, vec![phonon.clone()])?;
        self.activity.record_success(format!(
            "Created {} phonon on card {}",
            phonon.display_amount(),
            card.display_name()
        ));
        Ok(phonon)
    }

    /// Destroy phonons on the card and hand back their private keys.
    /// Phonons staged in a proposal cannot be redeemed.
    pub async fn redeem_phonons(
        &self,
        card_id: &CardId,
        addresses: &[String],
    ) -> Result<Vec<RedeemedPhonon>> {
        if addresses.is_empty() {
            return Err(ClientError::NothingToRedeem);
        }
        let card = self.unlocked_local_card(card_id)?;
        let mut phonons = Vec::with_capacity(addresses.len());
        for address in addresses {
            let phonon = card
                .phonon(address)
                .ok_or_else(|| ClientError::PhononNotOnCard {
                    address: address.clone(),
                    card_id: card_id.clone(),
                })?;
            if let Some((holder, direction)) = self.proposals.proposal_holding(address) {
                return Err(ClientError::PhononAlreadyProposed {
                    address: address.clone(),
                    card_id: holder,
                    direction,
                });
            }
            phonons.push(phonon.clone());
        }

        let redeemed = match self
            .device_call("redeem", self.device().redeem_phonons(card_id, &phonons))
            .await
        {
            Ok(redeemed) => redeemed,
            Err(e) => {
                self.activity.record_error(format!(
                    "Could not redeem phonons on card {}: {e}",
                    card.display_name()
                ));
                return Err(e.into());
            }
        };
        let gone: Vec<String> = redeemed.iter().map(|r| r.address.clone()).collect();
        self.store.remove_phonons_from_card(card_id, &gone)?;
        for phonon in phonons.iter().filter(|p| gone.contains(&p.address)) {
            self.activity.record_success(format!(
                "Redeemed {} phonon from card {}",
                phonon.display_amount(),
                card.display_name()
            ));
        }
        Ok(redeemed)
    }

    /// Start mining in the background.  `None` uses the default difficulty
    /// from settings.  Returns the attempt id to poll.
    pub fn start_mining(&self, card_id: &CardId, difficulty: Option<u8>) -> Result<String> {
        let (attempt_id, _run) = self
            .miner
            .start(card_id, self.mining_difficulty(difficulty))?;
        Ok(attempt_id)
    }

    /// Mine and wait for the final report.
    pub async fn mine_phonon(&self, card_id: &CardId, difficulty: Option<u8>) -> Result<MiningReport> {
        let (_, run) = self
            .miner
            .start(card_id, self.mining_difficulty(difficulty))?;
        run.await.map_err(|_| ClientError::Cancelled)
    }

    pub fn cancel_mining(&self) -> Result<String> {
        self.miner.cancel()
    }

    pub fn mining_report(&self, attempt_id: &str) -> Result<MiningReport> {
        self.miner.report(attempt_id)
    }

    pub fn mining_reports(&self) -> Vec<MiningReport> {
        self.miner.reports()
    }

    fn mining_difficulty(&self, requested: Option<u8>) -> u8 {
        requested
            .unwrap_or_else(|| self.settings().default_mining_difficulty)
            .min(MAX_MINING_DIFFICULTY)
    }

    fn unlocked_local_card(&self, card_id: &CardId) -> Result<Card> {
        let card = self.card(card_id)?;
        if card.is_remote {
            return Err(ClientError::RemoteCardPhonons(card_id.clone()));
        }
        if card.is_locked {
            return Err(ClientError::CardLocked(card_id.clone()));
        }
        Ok(card)
    }

    /// Bound a single card round trip by the validation timeout.
    async fn device_call<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = std::result::Result<T, DeviceError>>,
    ) -> std::result::Result<T, DeviceError> {
        let limit = self.config.validation_timeout;
        match timeout(limit, call).await {
            Ok(answer) => answer,
            Err(_) => Err(DeviceError::Timeout {
                operation,
                after_ms: limit.as_millis() as u64,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Proposals
    // ------------------------------------------------------------------

    pub fn proposal(&self, card_id: &CardId, direction: Direction) -> Result<TransferProposal> {
        self.proposals.proposal(card_id, direction)
    }

    /// Stage phonons.  An incoming proposal starts validating right away
    /// when the auto-validate setting is on.
    pub fn add_phonons_to_proposal(
        &self,
        card_id: &CardId,
        phonons: Vec<Phonon>,
        direction: Direction,
    ) -> Result<TransferProposal> {
        let proposal = self
            .proposals
            .add_phonons_to_proposal(card_id, phonons, direction)?;

        let auto_validate = self.settings().auto_validate_incoming_phonon_requests;
        if direction == Direction::Incoming
            && auto_validate
            && proposal.status == ProposalStatus::Unvalidated
        {
            tracing::debug!(card_id = %card_id, "auto-validating incoming proposal");
            self.coordinator.start_validation(card_id, direction)?;
            return self.proposals.proposal(card_id, direction);
        }
        Ok(proposal)
    }

    pub fn remove_phonons_from_proposal(
        &self,
        card_id: &CardId,
        addresses: &[String],
        direction: Direction,
    ) -> Result<TransferProposal> {
        self.proposals
            .remove_phonons_from_proposal(card_id, addresses, direction)
    }

    pub fn reset_proposal(&self, card_id: &CardId, direction: Direction) -> Result<()> {
        self.proposals.reset_proposal(card_id, direction)
    }

    pub fn decline_proposal(&self, card_id: &CardId, direction: Direction) -> Result<()> {
        self.proposals.decline_proposal(card_id, direction)?;
        self.activity.record_success(format!(
            "Declined {direction} proposal on card {}",
            card_id.short()
        ));
        Ok(())
    }

    pub fn update_proposal_status(
        &self,
        card_id: &CardId,
        direction: Direction,
        status: ProposalStatus,
    ) -> Result<()> {
        self.proposals
            .update_proposal_status(card_id, direction, status)
    }

    /// Validate and wait for the aggregate status.
    pub async fn validate_proposal(
        &self,
        card_id: &CardId,
        direction: Direction,
    ) -> Result<ProposalStatus> {
        self.coordinator.validate(card_id, direction).await
    }

    /// Start validation in the background; the proposal is `validating`
    /// when this returns.
    pub fn start_validation(
        &self,
        card_id: &CardId,
        direction: Direction,
    ) -> Result<JoinHandle<Result<ProposalStatus>>> {
        self.coordinator.start_validation(card_id, direction)
    }

    /// Transfer and wait.  Returns the number of phonons moved.
    pub async fn accept_proposal(
        &self,
        card_id: &CardId,
        direction: Direction,
        ignore_validation: bool,
    ) -> Result<usize> {
        self.coordinator
            .transfer(card_id, direction, ignore_validation)
            .await
    }

    pub fn start_transfer(
        &self,
        card_id: &CardId,
        direction: Direction,
        ignore_validation: bool,
    ) -> Result<JoinHandle<Result<usize>>> {
        self.coordinator
            .start_transfer(card_id, direction, ignore_validation)
    }

    // ------------------------------------------------------------------
    // Settings and activity
    // ------------------------------------------------------------------

    pub fn settings(&self) -> ConfigurableSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Persist and apply new settings.  Returns them as stored.
    pub fn update_settings(&self, settings: ConfigurableSettings) -> Result<ConfigurableSettings> {
        let settings = settings.normalized();
        self.db
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .save_settings(&settings)?;
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        tracing::info!(?settings, "settings updated");
        Ok(settings)
    }

    pub fn activity(&self) -> Vec<ActivityEntry> {
        self.activity.history()
    }

    pub fn clear_activity(&self) -> Result<()> {
        self.activity.clear()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Abort in-flight work, drop mock cards and write the final state.
    pub fn shutdown(&self) -> Result<()> {
        self.proposals.cancel_all();
        if let Ok(attempt_id) = self.miner.cancel() {
            tracing::debug!(%attempt_id, "mining cancelled for shutdown");
        }

        let mocks: Vec<CardId> = self
            .store
            .snapshot()
            .cards
            .iter()
            .filter(|c| c.is_mock)
            .map(|c| c.card_id.clone())
            .collect();
        if !mocks.is_empty() {
            self.store.remove_cards(&mocks);
        }

        if let Some(task) = self
            .persistence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        persistence::flush(self.store.as_ref(), &self.db)?;
        tracing::info!(removed_mocks = mocks.len(), "session shut down");
        Ok(())
    }
}
