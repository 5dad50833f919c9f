//! SQLite transcript store.
//!
//! Tracks are keyed by a UUIDv5 of their page URL, so re-running a playlist
//! updates the same rows. Each save replaces the track's transcript in a
//! single transaction.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use super::{PersistError, TranscriptStore};
use crate::domain::{Item, ItemMetadata, RecordId, Transcript, TranscriptSegment};

/// Status written for tracks whose transcript is stored
pub const STATUS_TRANSCRIBED: &str = "TRANSCRIBED";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tracks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    track_uuid TEXT NOT NULL UNIQUE,
    item_id TEXT NOT NULL,
    webpage_url TEXT NOT NULL UNIQUE,
    title TEXT,
    uploader TEXT,
    duration_seconds REAL,
    playlist_url TEXT,
    track_number_in_playlist INTEGER,
    status TEXT NOT NULL DEFAULT 'PENDING',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tracks_status ON tracks(status);
CREATE INDEX IF NOT EXISTS idx_tracks_playlist ON tracks(playlist_url);

CREATE TABLE IF NOT EXISTS transcripts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    track_id INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
    language TEXT,
    full_text TEXT NOT NULL,
    segment_count INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transcripts_track ON transcripts(track_id);

CREATE TABLE IF NOT EXISTS transcript_segments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    transcript_id INTEGER NOT NULL REFERENCES transcripts(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    start_ms INTEGER NOT NULL,
    end_ms INTEGER NOT NULL,
    text TEXT NOT NULL,
    UNIQUE (transcript_id, position)
);
"#;

/// Where the database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

impl DatabaseLocation {
    /// Parse `sqlite::memory:`, `sqlite://path`, `sqlite:path` or a bare path
    pub fn parse(database_url: &str) -> Result<Self, String> {
        let url = database_url.trim();
        if url.is_empty() {
            return Err("database_url must not be empty".to_string());
        }

        if matches!(url, "sqlite::memory:" | ":memory:") {
            return Ok(Self::Memory);
        }

        let path = if let Some(rest) = url.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = url.strip_prefix("sqlite:") {
            rest
        } else if let Some((scheme, _)) = url.split_once("://") {
            return Err(format!(
                "unsupported database scheme '{}', only sqlite is available",
                scheme
            ));
        } else {
            url
        };

        if path.is_empty() {
            return Err(format!("database_url '{}' has no path", database_url));
        }

        Ok(Self::File(PathBuf::from(path)))
    }
}

/// Stable track key derived from the page URL
pub fn track_uuid(source_ref: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, source_ref.as_bytes())
}

/// Transcript store backed by a single SQLite connection
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open the database named by a `database_url` and apply the schema
    pub fn open(database_url: &str) -> Result<Self, PersistError> {
        let location = DatabaseLocation::parse(database_url).map_err(PersistError::connection_lost)?;
        Self::open_location(&location)
    }

    pub fn open_location(location: &DatabaseLocation) -> Result<Self, PersistError> {
        let conn = match location {
            DatabaseLocation::Memory => Connection::open_in_memory(),
            DatabaseLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        PersistError::connection_lost(format!(
                            "cannot create database directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
                Connection::open(path)
            }
        }
        .map_err(map_sqlite_error)?;

        conn.busy_timeout(BUSY_TIMEOUT).map_err(map_sqlite_error)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(map_sqlite_error)?;
        conn.execute_batch(SCHEMA).map_err(map_sqlite_error)?;

        info!(location = ?location, "Transcript store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, PersistError> {
        Self::open_location(&DatabaseLocation::Memory)
    }

    /// Run blocking database work off the async runtime
    async fn with_connection<T, F>(&self, work: F) -> Result<T, PersistError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| PersistError::connection_lost("database connection poisoned"))?;
            work(&mut guard).map_err(map_sqlite_error)
        })
        .await
        .map_err(|e| PersistError::connection_lost(format!("database task failed: {}", e)))?
    }

    /// Read a stored transcript back
    pub async fn load_transcript(&self, record_id: RecordId) -> Result<Option<Transcript>, PersistError> {
        self.with_connection(move |conn| load_transcript(conn, record_id))
            .await
    }

    /// Status column of a track, if the track exists
    pub async fn track_status(&self, source_ref: &str) -> Result<Option<String>, PersistError> {
        let uuid = track_uuid(source_ref).to_string();
        self.with_connection(move |conn| {
            conn.query_row(
                "SELECT status FROM tracks WHERE track_uuid = ?1",
                params![uuid],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }
}

#[async_trait]
impl TranscriptStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save(&self, transcript: &Transcript) -> Result<RecordId, PersistError> {
        let transcript = transcript.clone();

        let record_id = self
            .with_connection(move |conn| save_transcript(conn, &transcript))
            .await?;

        debug!(%record_id, "Transcript saved");
        Ok(record_id)
    }

    async fn find_existing(&self, source_ref: &str) -> Result<Option<RecordId>, PersistError> {
        let uuid = track_uuid(source_ref).to_string();

        self.with_connection(move |conn| {
            conn.query_row(
                "SELECT t.id FROM transcripts t
                 JOIN tracks k ON k.id = t.track_id
                 WHERE k.track_uuid = ?1 AND k.status = ?2
                 ORDER BY t.id DESC LIMIT 1",
                params![uuid, STATUS_TRANSCRIBED],
                |row| row.get::<_, i64>(0),
            )
            .optional()
        })
        .await
        .map(|id| id.map(RecordId))
    }
}

fn save_transcript(conn: &mut Connection, transcript: &Transcript) -> rusqlite::Result<RecordId> {
    let now = Utc::now().to_rfc3339();
    let meta = &transcript.metadata;
    let tx = conn.transaction()?;

    let track_id: i64 = tx.query_row(
        "INSERT INTO tracks (track_uuid, item_id, webpage_url, title, uploader, duration_seconds,
                             playlist_url, track_number_in_playlist, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
         ON CONFLICT(track_uuid) DO UPDATE SET
             item_id = excluded.item_id,
             title = excluded.title,
             uploader = excluded.uploader,
             duration_seconds = excluded.duration_seconds,
             playlist_url = excluded.playlist_url,
             track_number_in_playlist = excluded.track_number_in_playlist,
             status = excluded.status,
             updated_at = excluded.updated_at
         RETURNING id",
        params![
            track_uuid(&transcript.source_ref).to_string(),
            transcript.item_id,
            transcript.source_ref,
            meta.title,
            meta.uploader,
            meta.duration_seconds,
            meta.playlist_url,
            meta.position,
            STATUS_TRANSCRIBED,
            now,
        ],
        |row| row.get(0),
    )?;

    tx.execute(
        "DELETE FROM transcript_segments
         WHERE transcript_id IN (SELECT id FROM transcripts WHERE track_id = ?1)",
        params![track_id],
    )?;
    tx.execute("DELETE FROM transcripts WHERE track_id = ?1", params![track_id])?;

    tx.execute(
        "INSERT INTO transcripts (track_id, language, full_text, segment_count, duration_ms, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            track_id,
            transcript.language,
            transcript.full_text(),
            transcript.segments.len() as i64,
            transcript.duration_ms() as i64,
            now,
        ],
    )?;
    let transcript_id = tx.last_insert_rowid();

    {
        let mut insert = tx.prepare(
            "INSERT INTO transcript_segments (transcript_id, position, start_ms, end_ms, text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (position, segment) in transcript.segments.iter().enumerate() {
            insert.execute(params![
                transcript_id,
                position as i64,
                segment.start_ms as i64,
                segment.end_ms as i64,
                segment.text,
            ])?;
        }
    }

    tx.commit()?;
    Ok(RecordId(transcript_id))
}

fn load_transcript(conn: &mut Connection, record_id: RecordId) -> rusqlite::Result<Option<Transcript>> {
    let header = conn
        .query_row(
            "SELECT k.item_id, k.webpage_url, k.title, k.uploader, k.duration_seconds,
                    k.playlist_url, k.track_number_in_playlist, t.language
             FROM transcripts t JOIN tracks k ON k.id = t.track_id
             WHERE t.id = ?1",
            params![record_id.0],
            |row| {
                let item = Item::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)
                    .with_metadata(ItemMetadata {
                        title: row.get(2)?,
                        uploader: row.get(3)?,
                        duration_seconds: row.get(4)?,
                        playlist_url: row.get(5)?,
                        position: row.get(6)?,
                    });
                let language: Option<String> = row.get(7)?;
                Ok((item, language))
            },
        )
        .optional()?;

    let Some((item, language)) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT start_ms, end_ms, text FROM transcript_segments
         WHERE transcript_id = ?1 ORDER BY position",
    )?;
    let segments = stmt
        .query_map(params![record_id.0], |row| {
            Ok(TranscriptSegment::new(
                row.get::<_, i64>(0)? as u64,
                row.get::<_, i64>(1)? as u64,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(Transcript {
        item_id: item.item_id,
        source_ref: item.source_ref,
        segments,
        language,
        metadata: item.metadata,
    }))
}

/// Map SQLite failures onto persist error kinds
fn map_sqlite_error(e: rusqlite::Error) -> PersistError {
    let code = match &e {
        rusqlite::Error::SqliteFailure(failure, _) => Some(failure.code),
        _ => None,
    };

    match code {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            PersistError::transient(e.to_string())
        }
        Some(ErrorCode::ConstraintViolation) => PersistError::constraint_violation(e.to_string()),
        Some(
            ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::PermissionDenied
            | ErrorCode::ReadOnly
            | ErrorCode::DiskFull,
        ) => PersistError::connection_lost(e.to_string()),
        // Anything else is a rejected statement; retrying would repeat it
        _ => PersistError::constraint_violation(e.to_string()),
    }
}
