//! Card device channel.
//!
//! Everything that needs a physical (or remote) card goes through
//! [`DeviceChannel`].  [`SimulatedDevice`] stands in for hardware: it sleeps
//! for a configurable latency and answers from an in-memory script.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use phonon_shared::constants::{
    DEFAULT_MOCK_PIN, NATIVE_CURRENCY_TYPE, SIMULATED_TRANSFER_LATENCY_MS,
    SIMULATED_VALIDATION_LATENCY_MS,
};
use phonon_shared::{CardId, Denomination, DeviceError, Direction, Phonon};
use rand::Rng;
use serde::Serialize;

pub trait DeviceChannel: Send + Sync + 'static {
    /// Present `pin` to the card.  A wrong PIN is `DeviceError::Unauthorized`.
    fn unlock(
        &self,
        card_id: &CardId,
        pin: &str,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Ask the card whether `phonon` is genuine and spendable.
    fn validate_phonon(
        &self,
        card_id: &CardId,
        phonon: &Phonon,
    ) -> impl Future<Output = Result<bool, DeviceError>> + Send;

    /// Move `phonons` into or out of the card.
    fn transfer(
        &self,
        card_id: &CardId,
        direction: Direction,
        phonons: &[Phonon],
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Give a factory-fresh card its first PIN.
    fn init_card(
        &self,
        card_id: &CardId,
        pin: &str,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Create a phonon under a fresh key on the card.
    fn create_phonon(
        &self,
        card_id: &CardId,
        currency_type: u16,
        denomination: &Denomination,
    ) -> impl Future<Output = Result<Phonon, DeviceError>> + Send;

    /// Destroy `phonons` on the card, releasing their private keys.
    fn redeem_phonons(
        &self,
        card_id: &CardId,
        phonons: &[Phonon],
    ) -> impl Future<Output = Result<Vec<RedeemedPhonon>, DeviceError>> + Send;

    /// One native mining attempt.  `None` when the hash fell short of
    /// `difficulty` leading zero bits.
    fn mine_phonon(
        &self,
        card_id: &CardId,
        difficulty: u8,
    ) -> impl Future<Output = Result<Option<Phonon>, DeviceError>> + Send;
}

/// A phonon destroyed on the card, with the key that now controls its funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RedeemedPhonon {
    pub address: String,
    pub private_key: String,
}

// ---------------------------------------------------------------------------
// Simulated device
// ---------------------------------------------------------------------------

/// How [`SimulatedDevice`] answers validation requests.
#[derive(Debug, Clone)]
pub enum ValidationPolicy {
    /// Each phonon is valid with the given probability.
    Random { valid_probability: f64 },
    AlwaysValid,
    /// Listed addresses get the listed answer; everything else is valid.
    Scripted(HashMap<String, bool>),
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::Random {
            valid_probability: 0.5,
        }
    }
}

#[derive(Default)]
struct Script {
    pins: HashMap<CardId, String>,
    delays: HashMap<String, Duration>,
    disconnected: HashSet<CardId>,
    uninitialized: HashSet<CardId>,
    transfer_failure: Option<DeviceError>,
    next_key_index: HashMap<CardId, u16>,
}

pub struct SimulatedDevice {
    validation_latency: Duration,
    transfer_latency: Duration,
    policy: Mutex<ValidationPolicy>,
    script: Mutex<Script>,
}

impl SimulatedDevice {
    pub fn new(validation_latency: Duration, transfer_latency: Duration) -> Self {
        Self {
            validation_latency,
            transfer_latency,
            policy: Mutex::new(ValidationPolicy::default()),
            script: Mutex::new(Script::default()),
        }
    }

    /// Zero latency, every phonon valid.  Used by tests.
    pub fn instant() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO).with_policy(ValidationPolicy::AlwaysValid)
    }

    pub fn with_policy(self, policy: ValidationPolicy) -> Self {
        self.set_policy(policy);
        self
    }

    pub fn set_policy(&self, policy: ValidationPolicy) {
        *self.policy.lock().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Cards without an explicit PIN accept the default mock PIN.
    pub fn set_pin(&self, card_id: CardId, pin: impl Into<String>) {
        self.script().pins.insert(card_id, pin.into());
    }

    /// Extra latency for validating one address, on top of the base latency.
    pub fn set_validation_delay(&self, address: impl Into<String>, delay: Duration) {
        self.script().delays.insert(address.into(), delay);
    }

    pub fn set_connected(&self, card_id: &CardId, connected: bool) {
        let mut script = self.script();
        if connected {
            script.disconnected.remove(card_id);
        } else {
            script.disconnected.insert(card_id.clone());
        }
    }

    /// The card has no PIN until [`DeviceChannel::init_card`] sets one.
    pub fn mark_uninitialized(&self, card_id: CardId) {
        let mut script = self.script();
        script.pins.remove(&card_id);
        script.uninitialized.insert(card_id);
    }

    /// Make the next transfers fail with `error` until cleared with `None`.
    pub fn fail_transfers_with(&self, error: Option<DeviceError>) {
        self.script().transfer_failure = error;
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_connected(&self, card_id: &CardId) -> Result<(), DeviceError> {
        if self.script().disconnected.contains(card_id) {
            return Err(DeviceError::CardNotConnected(card_id.clone()));
        }
        Ok(())
    }

    fn next_key_index(&self, card_id: &CardId) -> u16 {
        let mut script = self.script();
        let index = script.next_key_index.entry(card_id.clone()).or_insert(0);
        let current = *index;
        *index = index.wrapping_add(1);
        current
    }

    fn decide(&self, address: &str) -> bool {
        match &*self.policy.lock().unwrap_or_else(PoisonError::into_inner) {
            ValidationPolicy::AlwaysValid => true,
            ValidationPolicy::Scripted(answers) => answers.get(address).copied().unwrap_or(true),
            ValidationPolicy::Random { valid_probability } => {
                rand::thread_rng().gen_bool(valid_probability.clamp(0.0, 1.0))
            }
        }
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(SIMULATED_VALIDATION_LATENCY_MS),
            Duration::from_millis(SIMULATED_TRANSFER_LATENCY_MS),
        )
    }
}

impl DeviceChannel for SimulatedDevice {
    fn unlock(
        &self,
        card_id: &CardId,
        pin: &str,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send {
        let outcome = self.ensure_connected(card_id).and_then(|()| {
            let script = self.script();
            if script.uninitialized.contains(card_id) {
                return Err(DeviceError::Unauthorized(format!(
                    "card {} has no PIN yet",
                    card_id.short()
                )));
            }
            let expected = script
                .pins
                .get(card_id)
                .map(String::as_str)
                .unwrap_or(DEFAULT_MOCK_PIN);
            if pin == expected {
                Ok(())
            } else {
                Err(DeviceError::Unauthorized(format!(
                    "PIN rejected by card {}",
                    card_id.short()
                )))
            }
        });
        async move { outcome }
    }

    fn validate_phonon(
        &self,
        card_id: &CardId,
        phonon: &Phonon,
    ) -> impl Future<Output = Result<bool, DeviceError>> + Send {
        let connected = self.ensure_connected(card_id);
        let delay = self.validation_latency
            + self
                .script()
                .delays
                .get(&phonon.address)
                .copied()
                .unwrap_or_default();
        // a key the card cannot parse never verifies
        let valid = phonon.pub_key_bytes().is_ok() && self.decide(&phonon.address);
        let address = phonon.address.clone();
        async move {
            connected?;
            tokio::time::sleep(delay).await;
            tracing::debug!(%address, valid, "simulated validation answered");
            Ok(valid)
        }
    }

    fn transfer(
        &self,
        card_id: &CardId,
        direction: Direction,
        phonons: &[Phonon],
    ) -> impl Future<Output = Result<(), DeviceError>> + Send {
        let outcome = self
            .ensure_connected(card_id)
            .and_then(|()| match self.script().transfer_failure.clone() {
                Some(error) => Err(error),
                None => Ok(()),
            });
        let latency = self.transfer_latency;
        let count = phonons.len();
        async move {
            tokio::time::sleep(latency).await;
            tracing::debug!(%direction, count, ok = outcome.is_ok(), "simulated transfer finished");
            outcome
        }
    }

    fn init_card(
        &self,
        card_id: &CardId,
        pin: &str,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send {
        let outcome = self.ensure_connected(card_id).and_then(|()| {
            let mut script = self.script();
            if !script.uninitialized.remove(card_id) {
                return Err(DeviceError::AlreadyInitialized(card_id.clone()));
            }
            script.pins.insert(card_id.clone(), pin.to_string());
            Ok(())
        });
        async move { outcome }
    }

    fn create_phonon(
        &self,
        card_id: &CardId,
        currency_type: u16,
        denomination: &Denomination,
    ) -> impl Future<Output = Result<Phonon, DeviceError>> + Send {
        let outcome = self.ensure_connected(card_id).map(|()| {
            let mut phonon = random_phonon(currency_type, denomination.clone());
            phonon.key_index = self.next_key_index(card_id);
            phonon
        });
        async move { outcome }
    }

    fn redeem_phonons(
        &self,
        card_id: &CardId,
        phonons: &[Phonon],
    ) -> impl Future<Output = Result<Vec<RedeemedPhonon>, DeviceError>> + Send {
        let outcome = self.ensure_connected(card_id).map(|()| {
            let mut rng = rand::thread_rng();
            phonons
                .iter()
                .map(|p| RedeemedPhonon {
                    address: p.address.clone(),
                    private_key: hex::encode(rng.gen::<[u8; 32]>()),
                })
                .collect()
        });
        async move { outcome }
    }

    fn mine_phonon(
        &self,
        card_id: &CardId,
        difficulty: u8,
    ) -> impl Future<Output = Result<Option<Phonon>, DeviceError>> + Send {
        let outcome = self.ensure_connected(card_id).map(|()| {
            let hash: [u8; 32] = rand::thread_rng().gen();
            (leading_zero_bits(&hash) >= u32::from(difficulty)).then(|| {
                let mut phonon = Phonon::new(
                    format!("0x{}", hex::encode(&hash[12..])),
                    NATIVE_CURRENCY_TYPE,
                    Denomination::default(),
                )
                .with_pub_key(&hash);
                phonon.key_index = self.next_key_index(card_id);
                phonon
            })
        });
        async move { outcome }
    }
}

fn random_phonon(currency_type: u16, denomination: Denomination) -> Phonon {
    let mut rng = rand::thread_rng();
    let mut key = [0u8; 33];
    rng.fill(&mut key[1..]);
    key[0] = if rng.gen::<bool>() { 0x02 } else { 0x03 };
    let address: [u8; 20] = rng.gen();
    Phonon::new(format!("0x{}", hex::encode(address)), currency_type, denomination).with_pub_key(&key)
}

fn leading_zero_bits(hash: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in hash {
        bits += byte.leading_zeros();
        if *byte != 0 {
            break;
        }
    }
    bits
}
