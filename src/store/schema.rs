//! Versioned SQLite schema for the radio database.
//!
//! The current schema version is written to `PRAGMA user_version`; on open,
//! migrations between versions are applied in order inside one transaction.

use anyhow::Result;
use rusqlite::Connection;

/// Offset so an empty/foreign database (user_version 0) is distinguishable
/// from schema version 0.
pub const BASE_DB_VERSION: i64 = 4200;

pub struct VersionedSchema {
    pub version: i64,
    pub create_sql: &'static str,
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

pub const RADIO_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    create_sql: CREATE_V0,
    migration: None,
}];

const CREATE_V0: &str = r#"
CREATE TABLE tts_entries (
    id              INTEGER PRIMARY KEY,
    epoch_ms        INTEGER NOT NULL UNIQUE,
    text            TEXT NOT NULL,
    audio_path      TEXT NOT NULL,
    transcript_path TEXT NOT NULL,
    track_title     TEXT,
    track_artist    TEXT,
    mode            TEXT NOT NULL,
    voice           TEXT,
    status          TEXT NOT NULL DEFAULT 'pending',
    size_bytes      INTEGER,
    duration_ms     INTEGER
);
CREATE INDEX idx_tts_entries_status ON tts_entries(status);

CREATE TABLE play_events (
    id           INTEGER PRIMARY KEY,
    kind         TEXT NOT NULL,
    epoch_ms     INTEGER NOT NULL,
    title        TEXT NOT NULL,
    artist       TEXT NOT NULL,
    album        TEXT NOT NULL DEFAULT '',
    source_uri   TEXT,
    artwork_ref  TEXT,
    tts_entry_id INTEGER REFERENCES tts_entries(id) ON DELETE SET NULL,
    extra        TEXT
);
CREATE INDEX idx_play_events_epoch ON play_events(epoch_ms);
CREATE INDEX idx_play_events_tts ON play_events(tts_entry_id);

CREATE TABLE artwork_cache (
    cache_key    TEXT PRIMARY KEY,
    artist       TEXT,
    album        TEXT,
    source_uri   TEXT,
    local_path   TEXT NOT NULL,
    size_bytes   INTEGER NOT NULL,
    cached_at    INTEGER NOT NULL,
    last_used_at INTEGER NOT NULL
);
CREATE INDEX idx_artwork_last_used ON artwork_cache(last_used_at);
"#;

/// Create the schema on a fresh database or migrate an older one in place.
pub fn migrate_if_needed(conn: &mut Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    let table_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    let latest = RADIO_VERSIONED_SCHEMAS
        .last()
        .expect("at least one schema version");

    if table_count == 0 {
        conn.execute_batch(latest.create_sql)?;
        conn.pragma_update(None, "user_version", BASE_DB_VERSION + latest.version)?;
        return Ok(());
    }

    let db_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    let mut current = if db_version < BASE_DB_VERSION {
        0
    } else {
        db_version - BASE_DB_VERSION
    };

    if current >= latest.version {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for schema in RADIO_VERSIONED_SCHEMAS {
        if schema.version <= current {
            continue;
        }
        if let Some(migration) = schema.migration {
            migration(&tx)?;
            current = schema.version;
        }
    }
    tx.pragma_update(None, "user_version", BASE_DB_VERSION + current)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_schema_on_empty_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_if_needed(&mut conn).unwrap();

        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, BASE_DB_VERSION);

        for table in ["play_events", "tts_entries", "artwork_cache"] {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            assert!(exists, "missing table {}", table);
        }
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_if_needed(&mut conn).unwrap();
        migrate_if_needed(&mut conn).unwrap();
    }

    #[test]
    fn indices_are_created() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_if_needed(&mut conn).unwrap();

        for index in [
            "idx_play_events_epoch",
            "idx_play_events_tts",
            "idx_tts_entries_status",
            "idx_artwork_last_used",
        ] {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1",
                    [index],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            assert!(exists, "missing index {}", index);
        }
    }
}
