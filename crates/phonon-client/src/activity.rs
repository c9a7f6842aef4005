//! User-facing activity log: persisted to the store and broadcast as events.

use std::sync::{Arc, Mutex, PoisonError};

use phonon_store::{ActivityEntry, Database};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::events::{emit_event, SessionEvent};

#[derive(Clone)]
pub struct ActivityLog {
    db: Arc<Mutex<Database>>,
    events: broadcast::Sender<SessionEvent>,
}

impl ActivityLog {
    pub fn new(db: Arc<Mutex<Database>>, events: broadcast::Sender<SessionEvent>) -> Self {
        Self { db, events }
    }

    pub fn record_success(&self, message: impl Into<String>) {
        self.record(ActivityEntry::success(message));
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.record(ActivityEntry::error(message));
    }

    /// A failed write is logged and otherwise ignored; the event still goes out.
    fn record(&self, entry: ActivityEntry) {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = db.append_activity(entry.clone()) {
            tracing::warn!(error = %e, "failed to persist activity entry");
        }
        drop(db);
        emit_event(&self.events, SessionEvent::Activity(entry));
    }

    pub fn history(&self) -> Vec<ActivityEntry> {
        self.db
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .activity_history()
    }

    pub fn clear(&self) -> Result<()> {
        self.db
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear_activity()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use phonon_store::ActivityKind;

    #[tokio::test]
    async fn entries_are_stored_and_broadcast() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let events = event_channel();
        let mut rx = events.subscribe();
        let log = ActivityLog::new(db, events);

        log.record_success("Card unlocked");
        log.record_error("Transfer failed");

        let history = log.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].kind, ActivityKind::Error);

        match rx.recv().await.unwrap() {
            SessionEvent::Activity(entry) => assert_eq!(entry.message, "Card unlocked"),
            other => panic!("unexpected event {other:?}"),
        }

        log.clear().unwrap();
        assert!(log.history().is_empty());
    }
}
