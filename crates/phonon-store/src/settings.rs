//! Persistence of [`ConfigurableSettings`] under `configurable_settings`.

use phonon_shared::constants::CONFIGURABLE_SETTINGS_STORAGE_KEY;

use crate::database::Database;
use crate::error::Result;
use crate::models::ConfigurableSettings;

impl Database {
    /// Stored settings, or the defaults when absent or unreadable.
    pub fn load_settings(&self) -> ConfigurableSettings {
        match self.get_json::<ConfigurableSettings>(CONFIGURABLE_SETTINGS_STORAGE_KEY) {
            Ok(Some(settings)) => settings.normalized(),
            Ok(None) => ConfigurableSettings::default(),
            Err(e) => {
                tracing::warn!(error = %e, "corrupt settings, using defaults");
                ConfigurableSettings::default()
            }
        }
    }

    pub fn save_settings(&self, settings: &ConfigurableSettings) -> Result<()> {
        self.put_json(CONFIGURABLE_SETTINGS_STORAGE_KEY, settings)?;
        tracing::info!("settings updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PhononLayout, PhononSortBy};

    #[test]
    fn defaults_when_missing() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.load_settings(), ConfigurableSettings::default());
    }

    #[test]
    fn save_and_load() {
        let db = Database::open_in_memory().unwrap();
        let settings = ConfigurableSettings {
            default_phonon_sort_by: PhononSortBy::Denomination,
            default_phonon_layout: PhononLayout::List,
            default_mining_difficulty: 12,
            auto_validate_incoming_phonon_requests: true,
        };
        db.save_settings(&settings).unwrap();
        assert_eq!(db.load_settings(), settings);
    }

    #[test]
    fn corrupt_settings_fall_back() {
        let db = Database::open_in_memory().unwrap();
        db.put_raw(CONFIGURABLE_SETTINGS_STORAGE_KEY, "\"oops\"")
            .unwrap();
        assert_eq!(db.load_settings(), ConfigurableSettings::default());
    }
}
