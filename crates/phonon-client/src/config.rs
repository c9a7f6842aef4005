//! Session configuration loaded from environment variables.
//!
//! Every setting has a default so a session can start with no configuration.

use std::path::PathBuf;
use std::time::Duration;

use phonon_shared::constants::{
    DEFAULT_TRANSFER_TIMEOUT_MS, DEFAULT_VALIDATION_TIMEOUT_MS, SIMULATED_TRANSFER_LATENCY_MS,
    SIMULATED_VALIDATION_LATENCY_MS,
};
use phonon_store::Database;

use crate::device::{SimulatedDevice, ValidationPolicy};
use crate::error::Result;

/// How the simulated device answers validation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Coin flip per phonon.
    #[default]
    Random,
    AlwaysValid,
}

impl ValidationMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "random" => Some(Self::Random),
            "always-valid" | "always_valid" | "valid" => Some(Self::AlwaysValid),
            _ => None,
        }
    }

    pub fn policy(self) -> ValidationPolicy {
        match self {
            Self::Random => ValidationPolicy::default(),
            Self::AlwaysValid => ValidationPolicy::AlwaysValid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Directory holding `phonon.db`.
    /// Env: `PHONON_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Bound on each per-phonon validation call.
    /// Env: `PHONON_VALIDATION_TIMEOUT_MS`
    pub validation_timeout: Duration,

    /// Bound on a whole transfer.
    /// Env: `PHONON_TRANSFER_TIMEOUT_MS`
    pub transfer_timeout: Duration,

    /// Simulated device latency for every call.  `None` keeps the built-in
    /// validation and transfer latencies.
    /// Env: `PHONON_DEVICE_LATENCY_MS`
    pub device_latency: Option<Duration>,

    /// Create one mock card when the session starts.
    /// Env: `PHONON_AUTO_MOCK` (true/false)
    pub auto_mock: bool,

    /// Env: `PHONON_VALIDATION_MODE` (`random` / `always-valid`)
    pub validation_mode: ValidationMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            validation_timeout: Duration::from_millis(DEFAULT_VALIDATION_TIMEOUT_MS),
            transfer_timeout: Duration::from_millis(DEFAULT_TRANSFER_TIMEOUT_MS),
            device_latency: None,
            auto_mock: false,
            validation_mode: ValidationMode::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("PHONON_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(ms) = parse_millis(&lookup, "PHONON_VALIDATION_TIMEOUT_MS") {
            config.validation_timeout = ms;
        }
        if let Some(ms) = parse_millis(&lookup, "PHONON_TRANSFER_TIMEOUT_MS") {
            config.transfer_timeout = ms;
        }
        config.device_latency = parse_millis(&lookup, "PHONON_DEVICE_LATENCY_MS");

        if let Some(val) = lookup("PHONON_AUTO_MOCK") {
            config.auto_mock = val == "true" || val == "1";
        }

        if let Some(val) = lookup("PHONON_VALIDATION_MODE") {
            match ValidationMode::parse(&val) {
                Some(mode) => config.validation_mode = mode,
                None => tracing::warn!(value = %val, "Invalid PHONON_VALIDATION_MODE, using default"),
            }
        }

        config
    }

    pub fn open_database(&self) -> Result<Database> {
        let db = match &self.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(phonon_store::StoreError::from)?;
                Database::open_at(&dir.join("phonon.db"))?
            }
            None => Database::new()?,
        };
        Ok(db)
    }

    /// The simulated device this configuration describes.
    pub fn simulated_device(&self) -> SimulatedDevice {
        let (validation, transfer) = match self.device_latency {
            Some(latency) => (latency, latency),
            None => (
                Duration::from_millis(SIMULATED_VALIDATION_LATENCY_MS),
                Duration::from_millis(SIMULATED_TRANSFER_LATENCY_MS),
            ),
        };
        SimulatedDevice::new(validation, transfer).with_policy(self.validation_mode.policy())
    }
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let value = lookup(key)?;
    match value.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(key, value = %value, "Invalid duration, using default");
            None
        }
    }
}
