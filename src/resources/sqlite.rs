//! SQLite-backed resource store.
//!
//! One row per (video, language) for each resource kind; the unique index is
//! what turns concurrent creation into a detectable conflict.

use super::{ResourceStatus, ResourceStore, Summary, Transcript, TranscriptOrigin};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transcripts (
    id TEXT PRIMARY KEY,
    video_id TEXT NOT NULL,
    language TEXT NOT NULL,
    status TEXT NOT NULL,
    text TEXT NOT NULL,
    origin TEXT NOT NULL,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (video_id, language)
);

CREATE TABLE IF NOT EXISTS summaries (
    id TEXT PRIMARY KEY,
    video_id TEXT NOT NULL,
    language TEXT NOT NULL,
    status TEXT NOT NULL,
    content TEXT,
    transcript_id TEXT,
    is_public INTEGER NOT NULL DEFAULT 1,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (video_id, language)
);

CREATE INDEX IF NOT EXISTS idx_summaries_status ON summaries(status);
"#;

const TRANSCRIPT_COLUMNS: &str =
    "id, video_id, language, status, text, origin, error, created_at, updated_at";

const SUMMARY_COLUMNS: &str =
    "id, video_id, language, status, content, transcript_id, is_public, error, created_at, updated_at";

/// SQLite-based resource store.
pub struct SqliteResourceStore {
    conn: Mutex<Connection>,
}

impl SqliteResourceStore {
    /// Open (or create) the database at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(StoreError::from)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(StoreError::from)?;
        conn.execute_batch(SCHEMA).map_err(StoreError::from)?;

        info!("Initialized SQLite resource store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        conn.execute_batch(SCHEMA).map_err(StoreError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Connection(format!("Failed to acquire lock: {}", e)).into())
    }

    fn map_insert_error(err: rusqlite::Error, what: String) -> StoreError {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _) if e.code == ErrorCode::ConstraintViolation => {
                StoreError::Conflict(what)
            }
            other => StoreError::Database(other),
        }
    }
}

fn parse_uuid(value: &str) -> std::result::Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("bad id {}: {}", value, e)))
}

fn parse_time(value: &str) -> std::result::Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {}: {}", value, e)))
}

fn parse_status(value: &str) -> std::result::Result<ResourceStatus, StoreError> {
    value.parse().map_err(StoreError::Corrupt)
}

/// Raw transcript columns, converted outside the rusqlite closure.
struct TranscriptRow {
    id: String,
    video_id: String,
    language: String,
    status: String,
    text: String,
    origin: String,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TranscriptRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            video_id: row.get(1)?,
            language: row.get(2)?,
            status: row.get(3)?,
            text: row.get(4)?,
            origin: row.get(5)?,
            error: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl TryFrom<TranscriptRow> for Transcript {
    type Error = StoreError;

    fn try_from(row: TranscriptRow) -> std::result::Result<Self, Self::Error> {
        Ok(Transcript {
            id: parse_uuid(&row.id)?,
            status: parse_status(&row.status)?,
            origin: TranscriptOrigin::decode(&row.origin)
                .ok_or_else(|| StoreError::Corrupt(format!("bad origin {}", row.origin)))?,
            created_at: parse_time(&row.created_at)?,
            updated_at: parse_time(&row.updated_at)?,
            video_id: row.video_id,
            language: row.language,
            text: row.text,
            error: row.error,
        })
    }
}

struct SummaryRow {
    id: String,
    video_id: String,
    language: String,
    status: String,
    content: Option<String>,
    transcript_id: Option<String>,
    is_public: bool,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SummaryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            video_id: row.get(1)?,
            language: row.get(2)?,
            status: row.get(3)?,
            content: row.get(4)?,
            transcript_id: row.get(5)?,
            is_public: row.get(6)?,
            error: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl TryFrom<SummaryRow> for Summary {
    type Error = StoreError;

    fn try_from(row: SummaryRow) -> std::result::Result<Self, Self::Error> {
        Ok(Summary {
            id: parse_uuid(&row.id)?,
            status: parse_status(&row.status)?,
            transcript_id: row.transcript_id.as_deref().map(parse_uuid).transpose()?,
            created_at: parse_time(&row.created_at)?,
            updated_at: parse_time(&row.updated_at)?,
            video_id: row.video_id,
            language: row.language,
            content: row.content,
            is_public: row.is_public,
            error: row.error,
        })
    }
}

#[async_trait]
impl ResourceStore for SqliteResourceStore {
    async fn find_transcript(&self, video_id: &str, language: &str) -> Result<Option<Transcript>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM transcripts WHERE video_id = ?1 AND language = ?2",
                    TRANSCRIPT_COLUMNS
                ),
                params![video_id, language],
                TranscriptRow::from_row,
            )
            .optional()
            .map_err(StoreError::from)?;

        Ok(row.map(Transcript::try_from).transpose()?)
    }

    async fn transcript_by_id(&self, id: Uuid) -> Result<Option<Transcript>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM transcripts WHERE id = ?1", TRANSCRIPT_COLUMNS),
                params![id.to_string()],
                TranscriptRow::from_row,
            )
            .optional()
            .map_err(StoreError::from)?;

        Ok(row.map(Transcript::try_from).transpose()?)
    }

    #[instrument(skip(self, transcript), fields(video_id = %transcript.video_id, language = %transcript.language))]
    async fn insert_transcript(&self, transcript: &Transcript) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO transcripts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                TRANSCRIPT_COLUMNS
            ),
            params![
                transcript.id.to_string(),
                transcript.video_id,
                transcript.language,
                transcript.status.as_str(),
                transcript.text,
                transcript.origin.encode(),
                transcript.error,
                transcript.created_at.to_rfc3339(),
                transcript.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| {
            Self::map_insert_error(
                e,
                format!("transcript {}/{}", transcript.video_id, transcript.language),
            )
        })?;

        debug!("Inserted transcript {}", transcript.id);
        Ok(())
    }

    async fn update_transcript(&self, transcript: &Transcript) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                r#"
                UPDATE transcripts
                SET status = ?2, text = ?3, origin = ?4, error = ?5, updated_at = ?6
                WHERE id = ?1 AND status != 'completed'
                "#,
                params![
                    transcript.id.to_string(),
                    transcript.status.as_str(),
                    transcript.text,
                    transcript.origin.encode(),
                    transcript.error,
                    transcript.updated_at.to_rfc3339(),
                ],
            )
            .map_err(StoreError::from)?;

        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "transcript {} is missing or already completed",
                transcript.id
            ))
            .into());
        }
        Ok(())
    }

    async fn delete_transcript(&self, video_id: &str, language: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM transcripts WHERE video_id = ?1 AND language = ?2",
                params![video_id, language],
            )
            .map_err(StoreError::from)?;
        Ok(removed > 0)
    }

    async fn find_summary(&self, video_id: &str, language: &str) -> Result<Option<Summary>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM summaries WHERE video_id = ?1 AND language = ?2",
                    SUMMARY_COLUMNS
                ),
                params![video_id, language],
                SummaryRow::from_row,
            )
            .optional()
            .map_err(StoreError::from)?;

        Ok(row.map(Summary::try_from).transpose()?)
    }

    async fn insert_summary(&self, summary: &Summary) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO summaries ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                SUMMARY_COLUMNS
            ),
            params![
                summary.id.to_string(),
                summary.video_id,
                summary.language,
                summary.status.as_str(),
                summary.content,
                summary.transcript_id.map(|id| id.to_string()),
                summary.is_public,
                summary.error,
                summary.created_at.to_rfc3339(),
                summary.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| {
            Self::map_insert_error(e, format!("summary {}/{}", summary.video_id, summary.language))
        })?;

        debug!("Inserted summary {}", summary.id);
        Ok(())
    }

    async fn update_summary(&self, summary: &Summary) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                r#"
                UPDATE summaries
                SET status = ?2, content = ?3, transcript_id = ?4, is_public = ?5,
                    error = ?6, updated_at = ?7
                WHERE id = ?1 AND status != 'completed'
                "#,
                params![
                    summary.id.to_string(),
                    summary.status.as_str(),
                    summary.content,
                    summary.transcript_id.map(|id| id.to_string()),
                    summary.is_public,
                    summary.error,
                    summary.updated_at.to_rfc3339(),
                ],
            )
            .map_err(StoreError::from)?;

        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "summary {} is missing or already completed",
                summary.id
            ))
            .into());
        }
        Ok(())
    }

    async fn delete_summary(&self, video_id: &str, language: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM summaries WHERE video_id = ?1 AND language = ?2",
                params![video_id, language],
            )
            .map_err(StoreError::from)?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TldwError;

    #[tokio::test]
    async fn test_transcript_round_trip() {
        let store = SqliteResourceStore::in_memory().unwrap();
        let transcript = Transcript::completed(
            "v1",
            "en",
            "Hello there.".to_string(),
            TranscriptOrigin::Translated("tr".into()),
        );

        store.insert_transcript(&transcript).await.unwrap();

        let loaded = store.find_transcript("v1", "en").await.unwrap().unwrap();
        assert_eq!(loaded.id, transcript.id);
        assert_eq!(loaded.text, "Hello there.");
        assert_eq!(loaded.origin, TranscriptOrigin::Translated("tr".into()));
        assert_eq!(store.transcript_by_id(transcript.id).await.unwrap().unwrap().language, "en");
        assert!(store.find_transcript("v1", "de").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_a_conflict() {
        let store = SqliteResourceStore::in_memory().unwrap();
        store.insert_transcript(&Transcript::pending("v1", "en")).await.unwrap();

        let err = store
            .insert_transcript(&Transcript::pending("v1", "en"))
            .await
            .unwrap_err();
        assert!(matches!(err, TldwError::Store(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_completed_transcript_is_not_overwritten() {
        let store = SqliteResourceStore::in_memory().unwrap();
        let mut transcript = Transcript::pending("v1", "en");
        store.insert_transcript(&transcript).await.unwrap();

        transcript.transition(ResourceStatus::Processing).unwrap();
        store.update_transcript(&transcript).await.unwrap();
        transcript.transition(ResourceStatus::Completed).unwrap();
        transcript.text = "done".into();
        store.update_transcript(&transcript).await.unwrap();

        let mut stale_copy = transcript.clone();
        stale_copy.status = ResourceStatus::Failed;
        assert!(store.update_transcript(&stale_copy).await.is_err());

        let loaded = store.find_transcript("v1", "en").await.unwrap().unwrap();
        assert_eq!(loaded.status, ResourceStatus::Completed);
        assert_eq!(loaded.text, "done");
    }

    #[tokio::test]
    async fn test_summary_lifecycle_and_delete() {
        let store = SqliteResourceStore::in_memory().unwrap();
        let transcript_id = Uuid::new_v4();
        let mut summary = Summary::pending("v1", "en", Some(transcript_id));
        store.insert_summary(&summary).await.unwrap();

        summary.transition(ResourceStatus::Processing).unwrap();
        summary.transition(ResourceStatus::Completed).unwrap();
        summary.content = Some("short".into());
        store.update_summary(&summary).await.unwrap();

        let loaded = store.find_summary("v1", "en").await.unwrap().unwrap();
        assert_eq!(loaded.id, summary.id);
        assert_eq!(loaded.transcript_id, Some(transcript_id));
        assert_eq!(loaded.content.as_deref(), Some("short"));

        assert!(store.delete_summary("v1", "en").await.unwrap());
        assert!(!store.delete_summary("v1", "en").await.unwrap());
        assert!(store.find_summary("v1", "en").await.unwrap().is_none());
    }
}
