//! # phonon-store
//!
//! Local persistence for the Phonon manager, backed by SQLite.
//!
//! The store is a small key/value table holding one JSON document per key:
//! the card collection (`phonon_cards`), the user's settings
//! (`configurable_settings`) and the activity log (`activity_history`).
//! Every write replaces the whole document for its key in a single
//! statement, so readers never observe a partial collection.

pub mod activity;
pub mod cards;
pub mod database;
pub mod kv;
pub mod migrations;
pub mod models;
pub mod settings;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
