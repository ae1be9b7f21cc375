//! SQLite-backed radio store implementation.

use super::error::StoreError;
use super::models::{
    ArtworkEntry, EventKind, HistoryEntry, NewPlayEvent, NewTtsArtifact, PlayEvent, StoreStats,
    TtsArtifact, TtsMode, TtsStatus,
};
use super::schema::migrate_if_needed;
use super::trait_def::{RadioStore, DEDUP_WINDOW_MS};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// SQLite-backed store with split read/write connections in WAL mode.
/// The write path is single-writer behind a mutex; reads go through a
/// separate connection and never block the writer.
#[derive(Clone)]
pub struct SqliteRadioStore {
    read_conn: Arc<Mutex<Connection>>,
    write_conn: Arc<Mutex<Connection>>,
}

impl SqliteRadioStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        let mut write_conn = Connection::open_with_flags(
            db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open radio database")?;

        migrate_if_needed(&mut write_conn)?;

        write_conn
            .pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on write connection")?;

        let read_conn = Connection::open_with_flags(
            db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open radio database for reading")?;

        read_conn
            .pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on read connection")?;
        read_conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let events: i64 = read_conn.query_row("SELECT COUNT(*) FROM play_events", [], |r| r.get(0))?;
        info!("Radio store ready: {} play events on record", events);

        Ok(Self {
            read_conn: Arc::new(Mutex::new(read_conn)),
            write_conn: Arc::new(Mutex::new(write_conn)),
        })
    }
}

fn conversion_err(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unknown {}: {}", what, value).into(),
    )
}

fn map_play_event(row: &Row) -> rusqlite::Result<PlayEvent> {
    let kind: String = row.get(1)?;
    let extra: Option<String> = row.get(9)?;
    Ok(PlayEvent {
        id: row.get(0)?,
        kind: EventKind::parse(&kind).ok_or_else(|| conversion_err(1, "event kind", &kind))?,
        epoch_ms: row.get(2)?,
        title: row.get(3)?,
        artist: row.get(4)?,
        album: row.get(5)?,
        source_uri: row.get(6)?,
        artwork_ref: row.get(7)?,
        tts_id: row.get(8)?,
        extra: extra.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

const PLAY_EVENT_COLUMNS: &str =
    "id, kind, epoch_ms, title, artist, album, source_uri, artwork_ref, tts_entry_id, extra";

fn map_tts(row: &Row) -> rusqlite::Result<TtsArtifact> {
    let mode: String = row.get(7)?;
    let status: String = row.get(9)?;
    Ok(TtsArtifact {
        id: row.get(0)?,
        epoch_ms: row.get(1)?,
        text: row.get(2)?,
        audio_path: row.get(3)?,
        transcript_path: row.get(4)?,
        track_title: row.get(5)?,
        track_artist: row.get(6)?,
        mode: TtsMode::parse(&mode).ok_or_else(|| conversion_err(7, "tts mode", &mode))?,
        voice: row.get(8)?,
        status: TtsStatus::parse(&status).ok_or_else(|| conversion_err(9, "tts status", &status))?,
        size_bytes: row.get(10)?,
        duration_ms: row.get(11)?,
    })
}

const TTS_COLUMNS: &str = "id, epoch_ms, text, audio_path, transcript_path, track_title, \
     track_artist, mode, voice, status, size_bytes, duration_ms";

fn map_artwork(row: &Row) -> rusqlite::Result<ArtworkEntry> {
    Ok(ArtworkEntry {
        key: row.get(0)?,
        artist: row.get(1)?,
        album: row.get(2)?,
        source_uri: row.get(3)?,
        local_path: row.get(4)?,
        size_bytes: row.get(5)?,
        cached_at: row.get(6)?,
        last_used_at: row.get(7)?,
    })
}

/// Insert an event inside an open transaction, enforcing the dedup window.
fn insert_event(conn: &Connection, event: &NewPlayEvent) -> Result<i64, StoreError> {
    let existing: Option<i64> = conn
        .prepare_cached(
            "SELECT id FROM play_events
             WHERE kind = ?1 AND title = ?2 AND artist = ?3
               AND epoch_ms BETWEEN ?4 AND ?5
             ORDER BY id DESC LIMIT 1",
        )?
        .query_row(
            params![
                event.kind().as_str(),
                event.title,
                event.artist,
                event.epoch_ms - DEDUP_WINDOW_MS,
                event.epoch_ms + DEDUP_WINDOW_MS,
            ],
            |r| r.get(0),
        )
        .optional()?;

    if let Some(existing_id) = existing {
        return Err(StoreError::DuplicateEvent { existing_id });
    }

    let extra = event
        .extra
        .as_ref()
        .map(|v| serde_json::to_string(v).unwrap_or_default());
    conn.prepare_cached(
        "INSERT INTO play_events (kind, epoch_ms, title, artist, album, source_uri, artwork_ref, extra)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?
    .execute(params![
        event.kind().as_str(),
        event.epoch_ms,
        event.title,
        event.artist,
        event.album,
        event.source_uri,
        event.artwork_ref,
        extra,
    ])?;
    Ok(conn.last_insert_rowid())
}

fn tts_status(conn: &Connection, id: i64) -> Result<TtsStatus, StoreError> {
    let status: Option<String> = conn
        .prepare_cached("SELECT status FROM tts_entries WHERE id = ?1")?
        .query_row(params![id], |r| r.get(0))
        .optional()?;
    let status = status.ok_or(StoreError::NotFound)?;
    TtsStatus::parse(&status).ok_or_else(|| StoreError::Unavailable(format!("corrupt status {}", status)))
}

impl RadioStore for SqliteRadioStore {
    fn commit_play_event(&self, event: &NewPlayEvent) -> Result<i64, StoreError> {
        let conn = self.write_conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let id = insert_event(&tx, event)?;
        tx.commit()?;
        Ok(id)
    }

    fn commit_and_link(&self, event: &NewPlayEvent, tts_id: i64) -> Result<i64, StoreError> {
        let conn = self.write_conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        if tts_status(&tx, tts_id)? != TtsStatus::Ready {
            return Err(StoreError::NotReady(tts_id));
        }
        let id = insert_event(&tx, event)?;
        tx.prepare_cached("UPDATE play_events SET tts_entry_id = ?1 WHERE id = ?2")?
            .execute(params![tts_id, id])?;
        tx.commit()?;
        Ok(id)
    }

    fn lookup_by_dedup(
        &self,
        kind: EventKind,
        title: &str,
        artist: &str,
        epoch_ms: i64,
    ) -> Result<Option<PlayEvent>, StoreError> {
        let conn = self.read_conn.lock().unwrap();
        let result = conn
            .prepare_cached(&format!(
                "SELECT {} FROM play_events
                 WHERE kind = ?1 AND title = ?2 AND artist = ?3
                   AND epoch_ms BETWEEN ?4 AND ?5
                 ORDER BY id DESC LIMIT 1",
                PLAY_EVENT_COLUMNS
            ))?
            .query_row(
                params![
                    kind.as_str(),
                    title,
                    artist,
                    epoch_ms - DEDUP_WINDOW_MS,
                    epoch_ms + DEDUP_WINDOW_MS,
                ],
                map_play_event,
            )
            .optional()?;
        Ok(result)
    }

    fn link_tts(&self, event_id: i64, tts_id: i64) -> Result<(), StoreError> {
        let conn = self.write_conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        if tts_status(&tx, tts_id)? != TtsStatus::Ready {
            return Err(StoreError::NotReady(tts_id));
        }
        let updated = tx
            .prepare_cached("UPDATE play_events SET tts_entry_id = ?1 WHERE id = ?2")?
            .execute(params![tts_id, event_id])?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        tx.commit()?;
        Ok(())
    }

    fn register_tts(&self, artifact: &NewTtsArtifact) -> Result<i64, StoreError> {
        let conn = self.write_conn.lock().unwrap();
        conn.prepare_cached(
            "INSERT INTO tts_entries
             (epoch_ms, text, audio_path, transcript_path, track_title, track_artist, mode, voice, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending')",
        )?
        .execute(params![
            artifact.epoch_ms,
            artifact.text,
            artifact.audio_path,
            artifact.transcript_path,
            artifact.track_title,
            artifact.track_artist,
            artifact.mode.as_str(),
            artifact.voice,
        ])?;
        Ok(conn.last_insert_rowid())
    }

    fn mark_tts(
        &self,
        id: i64,
        status: TtsStatus,
        size_bytes: Option<i64>,
        duration_ms: Option<i64>,
    ) -> Result<(), StoreError> {
        let conn = self.write_conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let current = tts_status(&tx, id)?;
        let legal = matches!(
            (current, status),
            (TtsStatus::Pending, TtsStatus::Ready)
                | (TtsStatus::Pending, TtsStatus::Failed)
                | (TtsStatus::Ready, TtsStatus::Garbage)
        );
        if !legal {
            return Err(StoreError::IllegalTransition {
                from: current,
                to: status,
            });
        }
        tx.prepare_cached(
            "UPDATE tts_entries
             SET status = ?1,
                 size_bytes = COALESCE(?2, size_bytes),
                 duration_ms = COALESCE(?3, duration_ms)
             WHERE id = ?4",
        )?
        .execute(params![status.as_str(), size_bytes, duration_ms, id])?;
        tx.commit()?;
        Ok(())
    }

    fn get_tts(&self, id: i64) -> Result<Option<TtsArtifact>, StoreError> {
        let conn = self.read_conn.lock().unwrap();
        let result = conn
            .prepare_cached(&format!(
                "SELECT {} FROM tts_entries WHERE id = ?1",
                TTS_COLUMNS
            ))?
            .query_row(params![id], map_tts)
            .optional()?;
        Ok(result)
    }

    fn find_tts_by_audio_path(&self, path: &str) -> Result<Option<TtsArtifact>, StoreError> {
        let conn = self.read_conn.lock().unwrap();
        let result = conn
            .prepare_cached(&format!(
                "SELECT {} FROM tts_entries WHERE audio_path = ?1 ORDER BY id DESC LIMIT 1",
                TTS_COLUMNS
            ))?
            .query_row(params![path], map_tts)
            .optional()?;
        Ok(result)
    }

    fn history(&self, limit: usize, before: Option<i64>) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.read_conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT e.id, e.kind, e.epoch_ms, e.title, e.artist, e.album, e.source_uri,
                    e.artwork_ref, e.tts_entry_id, e.extra, t.text, t.audio_path
             FROM play_events e
             LEFT JOIN tts_entries t ON e.tts_entry_id = t.id AND t.status = 'ready'
             WHERE e.id < ?1
             ORDER BY e.id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![before.unwrap_or(i64::MAX), limit as i64],
            |row| {
                let event = map_play_event(row)?;
                Ok(HistoryEntry {
                    event,
                    tts_text: row.get(10)?,
                    tts_audio_path: row.get(11)?,
                })
            },
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn latest_dj_event_since(&self, epoch_ms: i64) -> Result<Option<PlayEvent>, StoreError> {
        let conn = self.read_conn.lock().unwrap();
        let result = conn
            .prepare_cached(&format!(
                "SELECT {} FROM play_events
                 WHERE kind = 'dj' AND epoch_ms >= ?1
                 ORDER BY epoch_ms DESC LIMIT 1",
                PLAY_EVENT_COLUMNS
            ))?
            .query_row(params![epoch_ms], map_play_event)
            .optional()?;
        Ok(result)
    }

    fn lookup_track(&self, artist: &str, title: &str) -> Result<Option<PlayEvent>, StoreError> {
        let conn = self.read_conn.lock().unwrap();
        let result = conn
            .prepare_cached(&format!(
                "SELECT {} FROM play_events
                 WHERE kind = 'song' AND LOWER(artist) = LOWER(?1) AND LOWER(title) = LOWER(?2)
                 ORDER BY epoch_ms DESC LIMIT 1",
                PLAY_EVENT_COLUMNS
            ))?
            .query_row(params![artist, title], map_play_event)
            .optional()?;
        Ok(result)
    }

    fn lookup_album_file(&self, artist: &str, album: &str) -> Result<Option<String>, StoreError> {
        let conn = self.read_conn.lock().unwrap();
        let result = conn
            .prepare_cached(
                "SELECT source_uri FROM play_events
                 WHERE kind = 'song' AND LOWER(artist) = LOWER(?1)
                   AND (?2 = '' OR LOWER(album) = LOWER(?2))
                   AND source_uri IS NOT NULL
                 ORDER BY epoch_ms DESC LIMIT 1",
            )?
            .query_row(params![artist, album], |r| r.get(0))
            .optional()?;
        Ok(result)
    }

    fn sweep_pending_tts(&self) -> Result<usize, StoreError> {
        let conn = self.write_conn.lock().unwrap();
        let swept = conn
            .prepare_cached("UPDATE tts_entries SET status = 'failed' WHERE status = 'pending'")?
            .execute([])?;
        Ok(swept)
    }

    fn prune_history(&self, keep_last: usize) -> Result<usize, StoreError> {
        let conn = self.write_conn.lock().unwrap();
        let pruned = conn
            .prepare_cached(
                "DELETE FROM play_events
                 WHERE id NOT IN (SELECT id FROM play_events ORDER BY id DESC LIMIT ?1)",
            )?
            .execute(params![keep_last as i64])?;
        Ok(pruned)
    }

    fn reap_dead_tts(&self, older_than_ms: i64) -> Result<Vec<TtsArtifact>, StoreError> {
        let conn = self.write_conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let dead: Vec<TtsArtifact> = {
            let mut stmt = tx.prepare_cached(&format!(
                "SELECT {} FROM tts_entries
                 WHERE status IN ('failed', 'garbage') AND epoch_ms < ?1",
                TTS_COLUMNS
            ))?;
            let rows = stmt.query_map(params![older_than_ms], map_tts)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for artifact in &dead {
            tx.prepare_cached("DELETE FROM tts_entries WHERE id = ?1")?
                .execute(params![artifact.id])?;
        }
        tx.commit()?;
        Ok(dead)
    }

    fn put_artwork(&self, entry: &ArtworkEntry) -> Result<(), StoreError> {
        let conn = self.write_conn.lock().unwrap();
        conn.prepare_cached(
            "INSERT OR REPLACE INTO artwork_cache
             (cache_key, artist, album, source_uri, local_path, size_bytes, cached_at, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?
        .execute(params![
            entry.key,
            entry.artist,
            entry.album,
            entry.source_uri,
            entry.local_path,
            entry.size_bytes,
            entry.cached_at,
            entry.last_used_at,
        ])?;
        Ok(())
    }

    fn get_artwork(&self, key: &str) -> Result<Option<ArtworkEntry>, StoreError> {
        let conn = self.read_conn.lock().unwrap();
        let result = conn
            .prepare_cached(
                "SELECT cache_key, artist, album, source_uri, local_path, size_bytes, cached_at, last_used_at
                 FROM artwork_cache WHERE cache_key = ?1",
            )?
            .query_row(params![key], map_artwork)
            .optional()?;
        Ok(result)
    }

    fn touch_artwork(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.write_conn.lock().unwrap();
        conn.prepare_cached("UPDATE artwork_cache SET last_used_at = ?1 WHERE cache_key = ?2")?
            .execute(params![crate::now_ms(), key])?;
        Ok(())
    }

    fn evict_artwork_over(&self, cap_bytes: i64) -> Result<Vec<ArtworkEntry>, StoreError> {
        let conn = self.write_conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let mut total: i64 = tx.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM artwork_cache",
            [],
            |r| r.get(0),
        )?;
        let mut evicted = Vec::new();
        if total > cap_bytes {
            let candidates: Vec<ArtworkEntry> = {
                let mut stmt = tx.prepare_cached(
                    "SELECT cache_key, artist, album, source_uri, local_path, size_bytes, cached_at, last_used_at
                     FROM artwork_cache ORDER BY last_used_at ASC",
                )?;
                let rows = stmt.query_map([], map_artwork)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            for entry in candidates {
                if total <= cap_bytes {
                    break;
                }
                tx.prepare_cached("DELETE FROM artwork_cache WHERE cache_key = ?1")?
                    .execute(params![entry.key])?;
                total -= entry.size_bytes;
                evicted.push(entry);
            }
        }
        tx.commit()?;
        Ok(evicted)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.read_conn.lock().unwrap();
        let song_events: usize =
            conn.query_row("SELECT COUNT(*) FROM play_events WHERE kind = 'song'", [], |r| r.get(0))?;
        let dj_events: usize =
            conn.query_row("SELECT COUNT(*) FROM play_events WHERE kind = 'dj'", [], |r| r.get(0))?;
        let ready_artifacts: usize =
            conn.query_row("SELECT COUNT(*) FROM tts_entries WHERE status = 'ready'", [], |r| {
                r.get(0)
            })?;
        let total_artifacts: usize =
            conn.query_row("SELECT COUNT(*) FROM tts_entries", [], |r| r.get(0))?;
        let artwork_entries: usize =
            conn.query_row("SELECT COUNT(*) FROM artwork_cache", [], |r| r.get(0))?;
        let artwork_bytes: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM artwork_cache",
            [],
            |r| r.get(0),
        )?;
        let events_last_24h: usize = conn.query_row(
            "SELECT COUNT(*) FROM play_events WHERE epoch_ms > ?1",
            params![crate::now_ms() - 24 * 60 * 60 * 1000],
            |r| r.get(0),
        )?;
        Ok(StoreStats {
            song_events,
            dj_events,
            ready_artifacts,
            total_artifacts,
            artwork_entries,
            artwork_bytes,
            events_last_24h,
        })
    }
}
