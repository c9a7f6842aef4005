//! In-memory card/phonon store.
//!
//! The store is the only writer of the card collection.  Each mutation runs
//! as a reducer over a copy of the affected records and is committed only if
//! it succeeds and the collection still upholds its invariants.  Every commit
//! bumps a monotonic version and publishes a full [`Snapshot`] on a
//! `watch` channel; observers must tolerate receiving only the latest one.

use std::sync::{Arc, Mutex, PoisonError};

use phonon_shared::{Card, CardId, Phonon};
use tokio::sync::watch;

use crate::error::{ClientError, Result};

/// Full, immutable view of the collection at one version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u64,
    pub cards: Vec<Card>,
}

impl Snapshot {
    pub fn card(&self, id: &CardId) -> Option<&Card> {
        self.cards.iter().find(|c| &c.card_id == id)
    }
}

/// Contract every card store implements.
///
/// Implementors supply the primitives; the card/phonon operations are
/// provided on top of [`CardStore::update_card`].
pub trait CardStore: Send + Sync {
    /// Latest published snapshot.
    fn snapshot(&self) -> Arc<Snapshot>;

    /// Receive every subsequent snapshot.
    fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>>;

    /// Merge by `CardId`; a card with a known id replaces the old record
    /// wholesale.  Remote cards are stored without phonons.
    fn add_cards(&self, cards: Vec<Card>);

    /// Remove by `CardId`.  Unknown ids are ignored.
    fn remove_cards(&self, ids: &[CardId]);

    /// Drop every card.
    fn clear(&self);

    /// Apply `f` to the whole collection atomically.  Nothing is committed
    /// if `f` fails or leaves the collection inconsistent.
    fn update_all(&self, f: &mut dyn FnMut(&mut Vec<Card>) -> Result<()>) -> Result<()>;

    fn cards(&self) -> Vec<Card> {
        self.snapshot().cards.clone()
    }

    fn get_card_by_id(&self, id: &CardId) -> Option<Card> {
        self.snapshot().card(id).cloned()
    }

    /// Apply `f` to one card and return the committed record.
    fn update_card(&self, id: &CardId, f: &mut dyn FnMut(&mut Card) -> Result<()>) -> Result<Card> {
        let mut updated = None;
        self.update_all(&mut |cards| {
            let card = cards
                .iter_mut()
                .find(|c| &c.card_id == id)
                .ok_or_else(|| ClientError::CardNotFound(id.clone()))?;
            f(card)?;
            updated = Some(card.clone());
            Ok(())
        })?;
        updated.ok_or_else(|| ClientError::CardNotFound(id.clone()))
    }

    /// Union into the card's phonons by `Address`, replacing known entries.
    fn add_phonons_to_card(&self, id: &CardId, phonons: Vec<Phonon>) -> Result<Card> {
        let mut phonons = Some(phonons);
        self.update_card(id, &mut |card| {
            if card.is_remote {
                return Err(ClientError::RemoteCardPhonons(card.card_id.clone()));
            }
            card.union_phonons(phonons.take().unwrap_or_default());
            Ok(())
        })
    }

    /// Set difference by `Address`.
    fn remove_phonons_from_card(&self, id: &CardId, addresses: &[String]) -> Result<Card> {
        self.update_card(id, &mut |card| {
            card.remove_phonons(addresses);
            Ok(())
        })
    }

    fn reset_phonons_on_card(&self, id: &CardId) -> Result<Card> {
        self.update_card(id, &mut |card| {
            card.phonons.clear();
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct Inner {
    version: u64,
    cards: Vec<Card>,
}

pub struct MemoryCardStore {
    inner: Mutex<Inner>,
    tx: watch::Sender<Arc<Snapshot>>,
}

impl MemoryCardStore {
    pub fn new() -> Self {
        Self::with_cards(Vec::new())
    }

    /// Start from a rehydrated collection.
    pub fn with_cards(cards: Vec<Card>) -> Self {
        let mut normalized = Vec::with_capacity(cards.len());
        for card in cards {
            merge_card(&mut normalized, card);
        }
        let snapshot = Arc::new(Snapshot {
            version: 0,
            cards: normalized.clone(),
        });
        let (tx, _rx) = watch::channel(snapshot);
        Self {
            inner: Mutex::new(Inner {
                version: 0,
                cards: normalized,
            }),
            tx,
        }
    }

    fn commit(&self, inner: &mut Inner, cards: Vec<Card>) {
        inner.version += 1;
        inner.cards = cards;
        let snapshot = Arc::new(Snapshot {
            version: inner.version,
            cards: inner.cards.clone(),
        });
        self.tx.send_replace(snapshot);
        tracing::trace!(version = inner.version, "card snapshot published");
    }
}

impl Default for MemoryCardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CardStore for MemoryCardStore {
    fn snapshot(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }

    fn add_cards(&self, cards: Vec<Card>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = inner.cards.clone();
        for card in cards {
            tracing::debug!(card_id = %card.card_id, "card added");
            merge_card(&mut next, card);
        }
        self.commit(&mut inner, next);
    }

    fn remove_cards(&self, ids: &[CardId]) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.cards.len();
        let next: Vec<Card> = inner
            .cards
            .iter()
            .filter(|c| !ids.contains(&c.card_id))
            .cloned()
            .collect();
        if next.len() != before {
            tracing::debug!(removed = before - next.len(), "cards removed");
            self.commit(&mut inner, next);
        }
    }

    fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.commit(&mut inner, Vec::new());
    }

    fn update_all(&self, f: &mut dyn FnMut(&mut Vec<Card>) -> Result<()>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = inner.cards.clone();
        f(&mut next)?;
        if let Some(card) = next.iter().find(|c| c.is_remote && !c.phonons.is_empty()) {
            return Err(ClientError::RemoteCardPhonons(card.card_id.clone()));
        }
        self.commit(&mut inner, next);
        Ok(())
    }
}

/// Last-write-wins by id; an existing card keeps its position.
fn merge_card(cards: &mut Vec<Card>, mut card: Card) {
    if card.is_remote && !card.phonons.is_empty() {
        tracing::warn!(
            card_id = %card.card_id,
            count = card.phonons.len(),
            "dropping phonons reported for a remote card"
        );
        card.phonons.clear();
    }
    match cards.iter_mut().find(|c| c.card_id == card.card_id) {
        Some(existing) => *existing = card,
        None => cards.push(card),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonon_shared::Denomination;

    fn phonon(address: &str) -> Phonon {
        Phonon::new(address, 2, Denomination::parse("100").unwrap())
    }

    fn ids(store: &dyn CardStore) -> Vec<String> {
        store
            .cards()
            .into_iter()
            .map(|c| c.card_id.0)
            .collect()
    }

    #[test]
    fn add_cards_is_union_with_last_write_wins() {
        let store = MemoryCardStore::new();
        let mut first = Card::new("a");
        first.vanity_name = Some("first".into());
        first.phonons = vec![phonon("p1")];
        store.add_cards(vec![first, Card::new("b")]);

        let mut second = Card::new("a");
        second.vanity_name = None;
        store.add_cards(vec![second.clone(), Card::new("c")]);

        assert_eq!(ids(&store), vec!["a", "b", "c"]);
        // no field-level merge: name and phonons from the first record are gone
        assert_eq!(store.get_card_by_id(&"a".into()), Some(second));
    }

    #[test]
    fn remove_then_add_keeps_last_added() {
        let store = MemoryCardStore::new();
        store.add_cards(vec![Card::new("a")]);
        store.remove_cards(&["a".into()]);

        let again = Card::new("a").unlocked();
        store.add_cards(vec![again.clone()]);
        assert_eq!(store.cards(), vec![again]);
    }

    #[test]
    fn removing_unknown_id_is_noop() {
        let store = MemoryCardStore::new();
        store.add_cards(vec![Card::new("a")]);
        let version = store.snapshot().version;

        store.remove_cards(&["zzz".into()]);
        assert_eq!(ids(&store), vec!["a"]);
        assert_eq!(store.snapshot().version, version);
    }

    #[test]
    fn get_card_by_id_missing() {
        let store = MemoryCardStore::new();
        assert!(store.get_card_by_id(&"nope".into()).is_none());
    }

    #[test]
    fn phonon_union_and_difference() {
        let store = MemoryCardStore::new();
        let id = CardId::from("a");
        store.add_cards(vec![Card::new("a")]);

        store
            .add_phonons_to_card(&id, vec![phonon("p1"), phonon("p2")])
            .unwrap();
        let mut replacement = phonon("p1");
        replacement.chain_id = 5;
        let card = store.add_phonons_to_card(&id, vec![replacement]).unwrap();
        assert_eq!(card.phonons.len(), 2);
        assert_eq!(card.phonons[0].chain_id, 5);

        let card = store
            .remove_phonons_from_card(&id, &["p2".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(card.phonons.len(), 1);

        let card = store.reset_phonons_on_card(&id).unwrap();
        assert!(card.phonons.is_empty());
    }

    #[test]
    fn remote_cards_never_hold_phonons() {
        let store = MemoryCardStore::new();
        let remote = Card::remote("r").with_phonons(vec![phonon("p1")]);
        store.add_cards(vec![remote]);
        assert!(store.get_card_by_id(&"r".into()).unwrap().phonons.is_empty());

        let err = store
            .add_phonons_to_card(&"r".into(), vec![phonon("p2")])
            .unwrap_err();
        assert!(matches!(err, ClientError::RemoteCardPhonons(_)));
    }

    #[test]
    fn failed_reducer_commits_nothing() {
        let store = MemoryCardStore::new();
        store.add_cards(vec![Card::new("a")]);
        let version = store.snapshot().version;

        let result = store.update_card(&"a".into(), &mut |card| {
            card.is_locked = false;
            Err(ClientError::EmptyProposal)
        });
        assert!(result.is_err());
        assert!(store.get_card_by_id(&"a".into()).unwrap().is_locked);
        assert_eq!(store.snapshot().version, version);
    }

    #[test]
    fn unknown_card_is_an_error() {
        let store = MemoryCardStore::new();
        let err = store
            .add_phonons_to_card(&"ghost".into(), vec![phonon("p")])
            .unwrap_err();
        assert!(matches!(err, ClientError::CardNotFound(_)));
    }

    #[tokio::test]
    async fn every_mutation_publishes_a_newer_snapshot() {
        let store = MemoryCardStore::new();
        let mut rx = store.subscribe();

        store.add_cards(vec![Card::new("a")]);
        rx.changed().await.unwrap();
        let first = rx.borrow_and_update().clone();
        assert_eq!(first.cards.len(), 1);

        store.add_phonons_to_card(&"a".into(), vec![phonon("p")]).unwrap();
        rx.changed().await.unwrap();
        let second = rx.borrow_and_update().clone();
        assert!(second.version > first.version);
        assert_eq!(second.cards[0].phonons.len(), 1);
    }

    #[test]
    fn interleaved_writers_do_not_lose_updates() {
        let store = Arc::new(MemoryCardStore::new());
        store.add_cards(vec![Card::new("a"), Card::new("b")]);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let id: CardId = if i % 2 == 0 { "a".into() } else { "b".into() };
                    store
                        .add_phonons_to_card(&id, vec![phonon(&format!("p{i}"))])
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let total: usize = store.cards().iter().map(|c| c.phonons.len()).sum();
        assert_eq!(total, 8);
    }
}
