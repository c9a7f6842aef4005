//! Persistence of the card collection under `phonon_cards`.

use chrono::Utc;
use phonon_shared::constants::{CARDS_SCHEMA_VERSION, PHONON_CARDS_STORAGE_KEY};
use phonon_shared::Card;
use serde::Deserialize;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::CardsEnvelope;

/// Either the versioned envelope or the bare array written before it existed.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredCards {
    Envelope(CardsEnvelope),
    Legacy(Vec<Card>),
}

impl Database {
    /// Write the full card collection, replacing whatever was stored.
    pub fn save_cards(&self, cards: &[Card]) -> Result<()> {
        let envelope = CardsEnvelope {
            schema_version: CARDS_SCHEMA_VERSION,
            saved_at: Utc::now(),
            cards: cards.to_vec(),
        };
        self.put_json(PHONON_CARDS_STORAGE_KEY, &envelope)?;
        tracing::debug!(count = cards.len(), "card collection saved");
        Ok(())
    }

    /// Read the stored card collection.  A missing key is an empty collection.
    pub fn load_cards(&self) -> Result<Vec<Card>> {
        let Some(json) = self.get_raw(PHONON_CARDS_STORAGE_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<StoredCards>(&json)? {
            StoredCards::Envelope(envelope) => {
                if envelope.schema_version > CARDS_SCHEMA_VERSION {
                    return Err(StoreError::UnsupportedSchema {
                        found: envelope.schema_version,
                        supported: CARDS_SCHEMA_VERSION,
                    });
                }
                Ok(envelope.cards)
            }
            StoredCards::Legacy(cards) => {
                tracing::info!(count = cards.len(), "loaded unversioned card collection");
                Ok(cards)
            }
        }
    }

    /// Like [`Database::load_cards`], but any unreadable payload becomes an
    /// empty collection.
    pub fn load_cards_or_empty(&self) -> Vec<Card> {
        match self.load_cards() {
            Ok(cards) => cards,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable card collection");
                Vec::new()
            }
        }
    }

    pub fn clear_cards(&self) -> Result<()> {
        self.remove_key(PHONON_CARDS_STORAGE_KEY)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonon_shared::{Denomination, Direction, Phonon};

    fn sample_cards() -> Vec<Card> {
        let phonon = Phonon::new("0xa1", 2, Denomination::parse("1000").unwrap()).with_chain_id(1);
        let mut card = Card::new("04e0d5eb884a73cf")
            .unlocked()
            .with_phonons(vec![phonon.clone()]);
        card.vanity_name = Some("Alice".into());
        card.proposal_mut(Direction::Outgoing).union(vec![phonon]);
        vec![card, Card::new("04e0d5eb884a73ce")]
    }

    #[test]
    fn round_trip() {
        let db = Database::open_in_memory().unwrap();
        let cards = sample_cards();
        db.save_cards(&cards).unwrap();
        assert_eq!(db.load_cards().unwrap(), cards);
    }

    #[test]
    fn missing_is_empty() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_cards().unwrap().is_empty());
    }

    #[test]
    fn malformed_payload_falls_back_to_empty() {
        let db = Database::open_in_memory().unwrap();
        db.put_raw(PHONON_CARDS_STORAGE_KEY, "{not json").unwrap();
        assert!(db.load_cards().is_err());
        assert!(db.load_cards_or_empty().is_empty());
    }

    #[test]
    fn legacy_bare_array_is_accepted() {
        let db = Database::open_in_memory().unwrap();
        db.put_raw(
            PHONON_CARDS_STORAGE_KEY,
            r#"[{"CardId":"04e0d5eb884a73cf","IsLocked":false,"Phonons":[]}]"#,
        )
        .unwrap();
        let cards = db.load_cards().unwrap();
        assert_eq!(cards.len(), 1);
        assert!(!cards[0].is_locked);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let json = format!(
            r#"{{"schema_version":{},"saved_at":"2024-01-01T00:00:00Z","cards":[]}}"#,
            CARDS_SCHEMA_VERSION + 1
        );
        db.put_raw(PHONON_CARDS_STORAGE_KEY, &json).unwrap();
        assert!(matches!(
            db.load_cards(),
            Err(StoreError::UnsupportedSchema { .. })
        ));
        assert!(db.load_cards_or_empty().is_empty());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cards.db");
        let cards = sample_cards();
        {
            let db = Database::open_at(&path).unwrap();
            db.save_cards(&cards).unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.load_cards().unwrap(), cards);
    }
}
