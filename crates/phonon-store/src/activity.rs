//! Activity history under `activity_history`, newest last.

use phonon_shared::constants::{ACTIVITY_HISTORY_STORAGE_KEY, MAX_ACTIVITY_ENTRIES};

use crate::database::Database;
use crate::error::Result;
use crate::models::ActivityEntry;

impl Database {
    pub fn activity_history(&self) -> Vec<ActivityEntry> {
        match self.get_json::<Vec<ActivityEntry>>(ACTIVITY_HISTORY_STORAGE_KEY) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "corrupt activity history, starting fresh");
                Vec::new()
            }
        }
    }

    /// Append an entry, dropping the oldest ones past the retention limit.
    pub fn append_activity(&self, entry: ActivityEntry) -> Result<()> {
        let mut entries = self.activity_history();
        entries.push(entry);
        if entries.len() > MAX_ACTIVITY_ENTRIES {
            let excess = entries.len() - MAX_ACTIVITY_ENTRIES;
            entries.drain(..excess);
        }
        self.put_json(ACTIVITY_HISTORY_STORAGE_KEY, &entries)
    }

    pub fn clear_activity(&self) -> Result<()> {
        self.remove_key(ACTIVITY_HISTORY_STORAGE_KEY)?;
        Ok(())
    }
}
