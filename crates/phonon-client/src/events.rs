use phonon_shared::{CardId, Direction, ProposalStatus};
use phonon_store::ActivityEntry;
use serde::Serialize;
use tokio::sync::broadcast;

pub const EVENT_PHONON_VALIDATED: &str = "phonon-validated";
pub const EVENT_PROPOSAL_STATUS_CHANGED: &str = "proposal-status-changed";
pub const EVENT_TRANSFER_COMPLETED: &str = "transfer-completed";
pub const EVENT_TRANSFER_FAILED: &str = "transfer-failed";
pub const EVENT_CARD_UNLOCKED: &str = "card-unlocked";
pub const EVENT_ACTIVITY: &str = "activity";

/// Buffered events per subscriber before the slowest one starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum SessionEvent {
    PhononValidated(PhononValidatedPayload),
    ProposalStatusChanged(ProposalStatusPayload),
    TransferCompleted(TransferCompletedPayload),
    TransferFailed(TransferFailedPayload),
    CardUnlocked(CardPayload),
    Activity(ActivityEntry),
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PhononValidated(_) => EVENT_PHONON_VALIDATED,
            Self::ProposalStatusChanged(_) => EVENT_PROPOSAL_STATUS_CHANGED,
            Self::TransferCompleted(_) => EVENT_TRANSFER_COMPLETED,
            Self::TransferFailed(_) => EVENT_TRANSFER_FAILED,
            Self::CardUnlocked(_) => EVENT_CARD_UNLOCKED,
            Self::Activity(_) => EVENT_ACTIVITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PhononValidatedPayload {
    pub card_id: CardId,
    pub direction: Direction,
    pub address: String,
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProposalStatusPayload {
    pub card_id: CardId,
    pub direction: Direction,
    pub status: ProposalStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TransferCompletedPayload {
    pub card_id: CardId,
    pub direction: Direction,
    pub moved: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TransferFailedPayload {
    pub card_id: CardId,
    pub direction: Direction,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CardPayload {
    pub card_id: CardId,
}

pub fn event_channel() -> broadcast::Sender<SessionEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

pub fn emit_event(tx: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    let name = event.name();
    // no subscribers is not an error
    if tx.send(event).is_err() {
        tracing::trace!(event = name, "event dropped, no subscribers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_name() {
        let event = SessionEvent::ProposalStatusChanged(ProposalStatusPayload {
            card_id: "04e0d5eb884a73ce".into(),
            direction: Direction::Incoming,
            status: ProposalStatus::HasErrors,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.name());
        assert_eq!(value["payload"]["status"], "has_errors");
        assert_eq!(value["payload"]["direction"], "incoming");
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_harmless() {
        let tx = event_channel();
        emit_event(&tx, SessionEvent::CardUnlocked(CardPayload { card_id: "c".into() }));

        let mut rx = tx.subscribe();
        emit_event(&tx, SessionEvent::CardUnlocked(CardPayload { card_id: "c".into() }));
        assert_eq!(rx.recv().await.unwrap().name(), EVENT_CARD_UNLOCKED);
    }
}
