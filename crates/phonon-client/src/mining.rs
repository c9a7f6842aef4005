//! Native phonon mining.
//!
//! A run repeats single mining attempts on one card until an attempt finds a
//! phonon, the run is cancelled or the card fails.  One run at a time; each
//! keeps a [`MiningReport`] under its attempt id that callers poll.

use std::sync::{Arc, Mutex, PoisonError};

use phonon_shared::{CardId, DeviceError, Phonon};
use rand::Rng;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::activity::ActivityLog;
use crate::device::DeviceChannel;
use crate::error::{ClientError, Result};
use crate::store::CardStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MiningStatus {
    Active,
    Success,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MiningReport {
    pub attempt_id: String,
    pub card_id: CardId,
    pub difficulty: u8,
    pub status: MiningStatus,
    pub attempts: u64,
    /// Milliseconds since the run started.
    pub time_elapsed: u64,
    /// Milliseconds per attempt, once the run has ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phonon: Option<Phonon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct ActiveRun {
    attempt_id: String,
    cancel: oneshot::Sender<()>,
}

enum Outcome {
    Found(Phonon),
    Cancelled,
    Failed(String),
}

pub struct Miner<D: DeviceChannel> {
    device: Arc<D>,
    store: Arc<dyn CardStore>,
    activity: ActivityLog,
    reports: Arc<Mutex<Vec<MiningReport>>>,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl<D: DeviceChannel> Clone for Miner<D> {
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            store: self.store.clone(),
            activity: self.activity.clone(),
            reports: self.reports.clone(),
            active: self.active.clone(),
        }
    }
}

impl<D: DeviceChannel> Miner<D> {
    pub fn new(device: Arc<D>, store: Arc<dyn CardStore>, activity: ActivityLog) -> Self {
        Self {
            device,
            store,
            activity,
            reports: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Start mining on an unlocked local card.  Returns the attempt id and
    /// the task that resolves to the final report.
    pub fn start(&self, card_id: &CardId, difficulty: u8) -> Result<(String, JoinHandle<MiningReport>)> {
        let card = self
            .store
            .get_card_by_id(card_id)
            .ok_or_else(|| ClientError::CardNotFound(card_id.clone()))?;
        if card.is_remote {
            return Err(ClientError::RemoteCardPhonons(card_id.clone()));
        }
        if card.is_locked {
            return Err(ClientError::CardLocked(card_id.clone()));
        }

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = active.as_ref() {
            return Err(ClientError::MiningActive(run.attempt_id.clone()));
        }

        let attempt_id = hex::encode(rand::thread_rng().gen::<[u8; 16]>());
        let (cancel, cancelled) = oneshot::channel();
        *active = Some(ActiveRun {
            attempt_id: attempt_id.clone(),
            cancel,
        });
        drop(active);

        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MiningReport {
                attempt_id: attempt_id.clone(),
                card_id: card_id.clone(),
                difficulty,
                status: MiningStatus::Active,
                attempts: 0,
                time_elapsed: 0,
                average_time: None,
                phonon: None,
                error: None,
            });

        tracing::info!(card_id = %card_id, difficulty, %attempt_id, "mining started");
        let this = self.clone();
        let (owned_id, owned_card) = (attempt_id.clone(), card_id.clone());
        let handle = tokio::spawn(async move {
            this.run(owned_id, owned_card, difficulty, cancelled).await
        });
        Ok((attempt_id, handle))
    }

    /// Stop the running attempt.  Returns its id.
    pub fn cancel(&self) -> Result<String> {
        let run = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ClientError::MiningNotActive)?;
        // the run may have finished already
        let _ = run.cancel.send(());
        Ok(run.attempt_id)
    }

    pub fn report(&self, attempt_id: &str) -> Result<MiningReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.attempt_id == attempt_id)
            .cloned()
            .ok_or_else(|| ClientError::MiningReportNotFound(attempt_id.to_string()))
    }

    pub fn reports(&self) -> Vec<MiningReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn run(
        self,
        attempt_id: String,
        card_id: CardId,
        difficulty: u8,
        mut cancelled: oneshot::Receiver<()>,
    ) -> MiningReport {
        let started = Instant::now();
        let mut attempts: u64 = 0;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut cancelled => break Outcome::Cancelled,
                attempt = self.device.mine_phonon(&card_id, difficulty) => {
                    attempts += 1;
                    match attempt {
                        Ok(Some(phonon)) => break Outcome::Found(phonon),
                        Ok(None) => {
                            let elapsed = started.elapsed().as_millis() as u64;
                            self.update(&attempt_id, |r| {
                                r.attempts = attempts;
                                r.time_elapsed = elapsed;
                            });
                            tokio::task::yield_now().await;
                        }
                        Err(e) => break Outcome::Failed(describe(&card_id, e)),
                    }
                }
            }
        };

        let elapsed = started.elapsed().as_millis() as u64;
        let (status, phonon, error) = match outcome {
            Outcome::Found(phonon) => match self.store.add_phonons_to_card(&card_id, vec![phonon.clone()]) {
                Ok(_) => {
                    self.activity.record_success(format!(
                        "Mined a phonon on card {} after {attempts} attempt(s)",
                        card_id.short()
                    ));
                    (MiningStatus::Success, Some(phonon), None)
                }
                Err(e) => {
                    self.activity
                        .record_error(format!("Mined phonon could not be stored: {e}"));
                    (MiningStatus::Error, Some(phonon), Some(e.to_string()))
                }
            },
            Outcome::Cancelled => (MiningStatus::Cancelled, None, None),
            Outcome::Failed(message) => {
                self.activity.record_error(message.clone());
                (MiningStatus::Error, None, Some(message))
            }
        };
        tracing::info!(card_id = %card_id, %attempt_id, ?status, attempts, elapsed_ms = elapsed, "mining finished");

        self.update(&attempt_id, |r| {
            r.status = status;
            r.attempts = attempts;
            r.time_elapsed = elapsed;
            r.average_time = (attempts > 0).then(|| elapsed / attempts);
            r.phonon = phonon.clone();
            r.error = error.clone();
        });

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|run| run.attempt_id == attempt_id) {
            *active = None;
        }
        drop(active);

        self.report(&attempt_id).unwrap_or_else(|_| MiningReport {
            attempt_id,
            card_id,
            difficulty,
            status,
            attempts,
            time_elapsed: elapsed,
            average_time: None,
            phonon,
            error,
        })
    }

    fn update(&self, attempt_id: &str, mut f: impl FnMut(&mut MiningReport)) {
        let mut reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(report) = reports.iter_mut().find(|r| r.attempt_id == attempt_id) {
            f(report);
        }
    }
}

fn describe(card_id: &CardId, e: DeviceError) -> String {
    tracing::warn!(card_id = %card_id, error = %e, recovery = ?e.recovery(), "mining attempt failed");
    format!("Mining on card {} failed: {e}", card_id.short())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::SimulatedDevice;
    use crate::events::event_channel;
    use crate::store::MemoryCardStore;
    use phonon_shared::constants::NATIVE_CURRENCY_TYPE;
    use phonon_shared::Card;
    use phonon_store::Database;

    const CARD_A: &str = "04e0d5eb884a73cf";

    fn miner() -> (Arc<MemoryCardStore>, Arc<SimulatedDevice>, Miner<SimulatedDevice>) {
        let store = Arc::new(MemoryCardStore::new());
        store.add_cards(vec![Card::new(CARD_A).unlocked()]);
        let device = Arc::new(SimulatedDevice::instant());
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let activity = ActivityLog::new(db, event_channel());
        let miner = Miner::new(device.clone(), store.clone(), activity);
        (store, device, miner)
    }

    #[tokio::test]
    async fn found_phonon_lands_on_the_card() {
        let (store, _device, miner) = miner();
        let a = CardId::from(CARD_A);
        let (id, handle) = miner.start(&a, 0).unwrap();

        let report = handle.await.unwrap();
        assert_eq!(report.attempt_id, id);
        assert_eq!(report.status, MiningStatus::Success);
        assert_eq!(report.attempts, 1);
        let phonon = report.phonon.unwrap();
        assert_eq!(phonon.currency_type, NATIVE_CURRENCY_TYPE);

        let card = store.get_card_by_id(&a).unwrap();
        assert!(card.phonon(&phonon.address).is_some());
        assert_eq!(miner.report(&id).unwrap().status, MiningStatus::Success);
        assert!(matches!(miner.cancel(), Err(ClientError::MiningNotActive)));
    }

    #[tokio::test]
    async fn one_run_at_a_time_and_cancel_stops_it() {
        let (store, _device, miner) = miner();
        let a = CardId::from(CARD_A);
        // 255 leading zero bits never happens
        let (id, handle) = miner.start(&a, u8::MAX).unwrap();
        assert!(matches!(miner.start(&a, 1), Err(ClientError::MiningActive(ref other)) if other == &id));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(miner.cancel().unwrap(), id);

        let report = handle.await.unwrap();
        assert_eq!(report.status, MiningStatus::Cancelled);
        assert!(report.attempts > 0);
        assert!(store.get_card_by_id(&a).unwrap().phonons.is_empty());
        assert_eq!(miner.reports().len(), 1);
    }

    #[tokio::test]
    async fn device_failure_ends_the_run() {
        let (_store, device, miner) = miner();
        let a = CardId::from(CARD_A);
        device.set_connected(&a, false);

        let (_id, handle) = miner.start(&a, 0).unwrap();
        let report = handle.await.unwrap();
        assert_eq!(report.status, MiningStatus::Error);
        assert!(report.error.unwrap().contains("not connected"));
    }

    #[tokio::test]
    async fn locked_cards_cannot_mine() {
        let (store, _device, miner) = miner();
        store.add_cards(vec![Card::new("c2")]);
        let err = miner.start(&CardId::from("c2"), 1).unwrap_err();
        assert!(matches!(err, ClientError::CardLocked(_)));
        assert!(matches!(
            miner.report("missing"),
            Err(ClientError::MiningReportNotFound(_))
        ));
    }
}
