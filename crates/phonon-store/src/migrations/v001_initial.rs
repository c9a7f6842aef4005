//! v001 -- Initial schema creation.
//!
//! A single key/value table.  Each row holds one whole JSON document.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key        TEXT PRIMARY KEY NOT NULL,   -- e.g. 'phonon_cards'
    json       TEXT NOT NULL,               -- whole document, replaced on every write
    updated_at TEXT NOT NULL                -- RFC-3339
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
