//! Documents persisted in the key/value store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer as JSON.

use chrono::{DateTime, Utc};
use phonon_shared::constants::{DEFAULT_MINING_DIFFICULTY, MAX_MINING_DIFFICULTY};
use phonon_shared::Card;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Card collection envelope
// ---------------------------------------------------------------------------

/// Versioned wrapper around the persisted card collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardsEnvelope {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub cards: Vec<Card>,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Field phonons are sorted by on a card.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PhononSortBy {
    #[default]
    ChainId,
    Denomination,
    CurrencyType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PhononLayout {
    #[default]
    Grid,
    List,
}

/// User-tunable defaults, stored under `configurable_settings`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigurableSettings {
    pub default_phonon_sort_by: PhononSortBy,
    pub default_phonon_layout: PhononLayout,
    pub default_mining_difficulty: u8,
    /// Start validating an incoming proposal as soon as it is staged.
    pub auto_validate_incoming_phonon_requests: bool,
}

impl Default for ConfigurableSettings {
    fn default() -> Self {
        Self {
            default_phonon_sort_by: PhononSortBy::default(),
            default_phonon_layout: PhononLayout::default(),
            default_mining_difficulty: DEFAULT_MINING_DIFFICULTY,
            auto_validate_incoming_phonon_requests: false,
        }
    }
}

impl ConfigurableSettings {
    /// Clamp values the settings form would never produce.
    pub fn normalized(mut self) -> Self {
        self.default_mining_difficulty = self
            .default_mining_difficulty
            .clamp(1, MAX_MINING_DIFFICULTY);
        self
    }
}

// ---------------------------------------------------------------------------
// Activity history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Success,
    Error,
}

/// One line in the activity history drawer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityEntry {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub message: String,
    pub datetime: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: ActivityKind::Success,
            message: message.into(),
            datetime: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ActivityKind::Error,
            message: message.into(),
            datetime: Utc::now(),
        }
    }
}
