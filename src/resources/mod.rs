//! Transcript and summary resources and the relational store that owns them.
//!
//! Both resources follow the same lifecycle:
//!
//! ```text
//! pending ──► processing ──► completed
//!    ▲            │
//!    │            ▼
//!    └──────── failed
//! ```
//!
//! `failed` re-enters `pending` on an explicit restart, and a summary stuck in
//! `pending`/`processing` past the staleness threshold may be restarted by the
//! next request for it. Nothing moves a resource out of `completed`.

mod sqlite;

pub use sqlite::SqliteResourceStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category of processed artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Transcript,
    Summary,
    Translation,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Transcript => "transcript",
            ResourceKind::Summary => "summary",
            ResourceKind::Translation => "translation",
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().trim_end_matches('s') {
            "transcript" => Ok(ResourceKind::Transcript),
            "summary" | "summarie" => Ok(ResourceKind::Summary),
            "translation" => Ok(ResourceKind::Translation),
            _ => Err(format!("Unknown resource kind: {}", s)),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a transcript or summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Processing => "processing",
            ResourceStatus::Completed => "completed",
            ResourceStatus::Failed => "failed",
        }
    }

    /// `completed` is final; `failed` is final until a restart.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResourceStatus::Completed | ResourceStatus::Failed)
    }

    /// Whether a stored resource may move from `self` to `next`.
    pub fn can_transition_to(&self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Pending)
                | (Failed, Pending)
                | (Failed, Processing)
        )
    }
}

impl std::str::FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ResourceStatus::Pending),
            "processing" => Ok(ResourceStatus::Processing),
            "completed" => Ok(ResourceStatus::Completed),
            "failed" => Ok(ResourceStatus::Failed),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a transcript's text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "from")]
pub enum TranscriptOrigin {
    /// Captions authored by the uploader.
    Manual,
    /// Automatically generated captions.
    Automatic,
    /// Machine translation of the transcript in another language.
    Translated(String),
}

impl TranscriptOrigin {
    /// Compact form used for storage and the status contract (`translated:tr`).
    pub fn encode(&self) -> String {
        match self {
            TranscriptOrigin::Manual => "manual".to_string(),
            TranscriptOrigin::Automatic => "automatic".to_string(),
            TranscriptOrigin::Translated(from) => format!("translated:{}", from),
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(TranscriptOrigin::Manual),
            "automatic" => Some(TranscriptOrigin::Automatic),
            other => other
                .strip_prefix("translated:")
                .filter(|lang| !lang.is_empty())
                .map(|lang| TranscriptOrigin::Translated(lang.to_string())),
        }
    }

    /// Source language of a translated transcript.
    pub fn translated_from(&self) -> Option<&str> {
        match self {
            TranscriptOrigin::Translated(from) => Some(from),
            _ => None,
        }
    }
}

/// The textual content of a video in one language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub id: Uuid,
    pub video_id: String,
    pub language: String,
    pub status: ResourceStatus,
    /// Plain text, empty until completed.
    pub text: String,
    pub origin: TranscriptOrigin,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transcript {
    /// A new transcript awaiting its creation job.
    pub fn pending(video_id: &str, language: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            video_id: video_id.to_string(),
            language: language.to_string(),
            status: ResourceStatus::Pending,
            text: String::new(),
            origin: TranscriptOrigin::Automatic,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A transcript that is complete on creation (fallback captions, translations).
    pub fn completed(video_id: &str, language: &str, text: String, origin: TranscriptOrigin) -> Self {
        Self {
            status: ResourceStatus::Completed,
            text,
            origin,
            ..Self::pending(video_id, language)
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ResourceStatus::Completed
    }

    /// Non-terminal and untouched for longer than `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: std::time::Duration) -> bool {
        is_stale(self.status, self.updated_at, now, threshold)
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: ResourceStatus) -> Result<()> {
        ensure_transition("transcript", self.id, self.status, next)?;
        self.status = next;
        self.updated_at = Utc::now();
        if next != ResourceStatus::Failed {
            self.error = None;
        }
        Ok(())
    }
}

/// The AI-produced condensation of a transcript in one language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: Uuid,
    pub video_id: String,
    pub language: String,
    pub status: ResourceStatus,
    pub content: Option<String>,
    /// The transcript the summary was produced from.
    pub transcript_id: Option<Uuid>,
    pub is_public: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Summary {
    /// A new summary awaiting its creation job.
    pub fn pending(video_id: &str, language: &str, transcript_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            video_id: video_id.to_string(),
            language: language.to_string(),
            status: ResourceStatus::Pending,
            content: None,
            transcript_id,
            is_public: true,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ResourceStatus::Completed
    }

    /// Non-terminal and untouched for longer than `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: std::time::Duration) -> bool {
        is_stale(self.status, self.updated_at, now, threshold)
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: ResourceStatus) -> Result<()> {
        ensure_transition("summary", self.id, self.status, next)?;
        self.status = next;
        self.updated_at = Utc::now();
        if next != ResourceStatus::Failed {
            self.error = None;
        }
        Ok(())
    }
}

fn is_stale(
    status: ResourceStatus,
    updated_at: DateTime<Utc>,
    now: DateTime<Utc>,
    threshold: std::time::Duration,
) -> bool {
    let threshold = ChronoDuration::from_std(threshold).unwrap_or(ChronoDuration::MAX);
    !status.is_terminal() && now - updated_at > threshold
}

fn ensure_transition(
    kind: &str,
    id: Uuid,
    from: ResourceStatus,
    to: ResourceStatus,
) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(crate::error::TldwError::InvalidInput(format!(
            "{} {} cannot move from {} to {}",
            kind, id, from, to
        )))
    }
}

/// Status as reported to pollers. Adds `not_found` to the stored states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    NotFound,
    Pending,
    Processing,
    Completed,
    Failed,
}

impl From<ResourceStatus> for QueryStatus {
    fn from(status: ResourceStatus) -> Self {
        match status {
            ResourceStatus::Pending => QueryStatus::Pending,
            ResourceStatus::Processing => QueryStatus::Processing,
            ResourceStatus::Completed => QueryStatus::Completed,
            ResourceStatus::Failed => QueryStatus::Failed,
        }
    }
}

impl QueryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryStatus::Completed | QueryStatus::Failed)
    }
}

/// Uniform status-query result for any resource kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusView {
    pub kind: ResourceKind,
    pub video_id: String,
    pub language: String,
    pub status: QueryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Transcript text or summary content, once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusView {
    pub fn not_found(kind: ResourceKind, video_id: &str, language: &str) -> Self {
        Self {
            kind,
            video_id: video_id.to_string(),
            language: language.to_string(),
            status: QueryStatus::NotFound,
            id: None,
            content: None,
            origin: None,
            error: None,
            updated_at: None,
        }
    }
}

impl From<&Transcript> for StatusView {
    fn from(t: &Transcript) -> Self {
        Self {
            kind: ResourceKind::Transcript,
            video_id: t.video_id.clone(),
            language: t.language.clone(),
            status: t.status.into(),
            id: Some(t.id),
            content: t.is_completed().then(|| t.text.clone()),
            origin: Some(t.origin.encode()),
            error: t.error.clone(),
            updated_at: Some(t.updated_at),
        }
    }
}

impl From<&Summary> for StatusView {
    fn from(s: &Summary) -> Self {
        Self {
            kind: ResourceKind::Summary,
            video_id: s.video_id.clone(),
            language: s.language.clone(),
            status: s.status.into(),
            id: Some(s.id),
            content: if s.is_public { s.content.clone() } else { None },
            origin: None,
            error: s.error.clone(),
            updated_at: Some(s.updated_at),
        }
    }
}

/// Trait for the relational source of truth.
///
/// `insert_*` fails with [`crate::error::StoreError::Conflict`] when a record
/// for the same (video, language) already exists; callers treat that as a
/// lost race and re-read. `update_*` never overwrites a completed record.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn find_transcript(&self, video_id: &str, language: &str) -> Result<Option<Transcript>>;

    async fn transcript_by_id(&self, id: Uuid) -> Result<Option<Transcript>>;

    async fn insert_transcript(&self, transcript: &Transcript) -> Result<()>;

    async fn update_transcript(&self, transcript: &Transcript) -> Result<()>;

    async fn delete_transcript(&self, video_id: &str, language: &str) -> Result<bool>;

    async fn find_summary(&self, video_id: &str, language: &str) -> Result<Option<Summary>>;

    async fn insert_summary(&self, summary: &Summary) -> Result<()>;

    async fn update_summary(&self, summary: &Summary) -> Result<()>;

    async fn delete_summary(&self, video_id: &str, language: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use ResourceStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_completed_transcript_refuses_changes() {
        let mut t = Transcript::completed("v1", "en", "text".into(), TranscriptOrigin::Manual);
        assert!(t.transition(ResourceStatus::Pending).is_err());
        assert_eq!(t.status, ResourceStatus::Completed);
    }

    #[test]
    fn test_origin_encoding() {
        let origin = TranscriptOrigin::Translated("tr".into());
        assert_eq!(origin.encode(), "translated:tr");
        assert_eq!(TranscriptOrigin::decode("translated:tr"), Some(origin));
        assert_eq!(TranscriptOrigin::decode("manual"), Some(TranscriptOrigin::Manual));
        assert_eq!(TranscriptOrigin::decode("translated:"), None);
    }

    #[test]
    fn test_summary_staleness() {
        let threshold = std::time::Duration::from_secs(30 * 60);
        let mut summary = Summary::pending("v1", "en", None);
        let now = Utc::now();
        assert!(!summary.is_stale(now, threshold));

        summary.updated_at = now - ChronoDuration::minutes(31);
        assert!(summary.is_stale(now, threshold));

        summary.status = ResourceStatus::Completed;
        assert!(!summary.is_stale(now, threshold));
    }

    #[test]
    fn test_private_summary_hides_content() {
        let mut summary = Summary::pending("v1", "en", None);
        summary.status = ResourceStatus::Completed;
        summary.content = Some("secret".into());
        summary.is_public = false;

        let view = StatusView::from(&summary);
        assert_eq!(view.status, QueryStatus::Completed);
        assert!(view.content.is_none());
    }

    #[test]
    fn test_kind_parsing_accepts_plurals() {
        assert_eq!("transcripts".parse::<ResourceKind>(), Ok(ResourceKind::Transcript));
        assert_eq!("summaries".parse::<ResourceKind>(), Ok(ResourceKind::Summary));
        assert!("captions".parse::<ResourceKind>().is_err());
    }
}
