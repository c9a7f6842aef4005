/// Application name
pub const APP_NAME: &str = "Phonon Manager";

/// Storage key holding the serialized card collection
pub const PHONON_CARDS_STORAGE_KEY: &str = "phonon_cards";

/// Storage key holding the user's configurable settings
pub const CONFIGURABLE_SETTINGS_STORAGE_KEY: &str = "configurable_settings";

/// Storage key holding the activity history log
pub const ACTIVITY_HISTORY_STORAGE_KEY: &str = "activity_history";

/// Schema version written into the persisted card envelope.
/// Payloads without an envelope (bare arrays) are treated as version 0.
pub const CARDS_SCHEMA_VERSION: u32 = 1;

/// Mock card ids are this prefix followed by a number in `0..999`
pub const MOCK_CARD_ID_PREFIX: &str = "04e0d5eb884ae";

/// Card PINs are exactly this many decimal digits
pub const PIN_LENGTH: usize = 6;

/// PIN assigned to simulated cards that were not given one explicitly
pub const DEFAULT_MOCK_PIN: &str = "111111";

/// Default upper bound for a single phonon validation round trip
pub const DEFAULT_VALIDATION_TIMEOUT_MS: u64 = 10_000;

/// Default upper bound for a transfer round trip
pub const DEFAULT_TRANSFER_TIMEOUT_MS: u64 = 30_000;

/// Latency of a simulated phonon validation
pub const SIMULATED_VALIDATION_LATENCY_MS: u64 = 3_000;

/// Latency of a simulated transfer
pub const SIMULATED_TRANSFER_LATENCY_MS: u64 = 8_000;

/// Mining difficulty bounds offered in settings
pub const DEFAULT_MINING_DIFFICULTY: u8 = 5;
pub const MAX_MINING_DIFFICULTY: u8 = 30;

/// Currency type of phonons mined on the card itself
pub const NATIVE_CURRENCY_TYPE: u16 = 0;

/// Maximum number of activity history entries retained
pub const MAX_ACTIVITY_ENTRIES: usize = 500;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
