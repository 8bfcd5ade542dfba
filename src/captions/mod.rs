//! Caption sources for transcripts.
//!
//! Provides a trait-based interface over caption providers, plus video
//! reference parsing shared by the CLI and HTTP surfaces.

mod vtt;
mod youtube;

pub use vtt::flatten_vtt;
pub use youtube::YoutubeCaptionSource;

use crate::error::{Result, TldwError};
use crate::resources::TranscriptOrigin;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

/// How a caption track was authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionKind {
    Manual,
    Automatic,
}

impl From<CaptionKind> for TranscriptOrigin {
    fn from(kind: CaptionKind) -> Self {
        match kind {
            CaptionKind::Manual => TranscriptOrigin::Manual,
            CaptionKind::Automatic => TranscriptOrigin::Automatic,
        }
    }
}

/// Flattened caption text for one video and language.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionTrack {
    pub text: String,
    pub kind: CaptionKind,
}

/// Trait for caption providers.
#[async_trait]
pub trait CaptionSource: Send + Sync {
    /// Fetch the caption track for `video_id` in `language`.
    ///
    /// `Ok(None)` means the video has no track in that language.
    async fn fetch_captions(&self, video_id: &str, language: &str) -> Result<Option<CaptionTrack>>;

    /// Source name for logs.
    fn name(&self) -> &'static str;
}

fn video_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Matches various YouTube URL formats and bare video IDs
        Regex::new(
            r"(?x)
            (?:
                (?:https?://)?
                (?:www\.|m\.)?
                (?:
                    youtube\.com/watch\?(?:[^\s\#]*&)?v=
                    | youtu\.be/
                    | youtube\.com/embed/
                    | youtube\.com/shorts/
                    | youtube\.com/v/
                )
                ([a-zA-Z0-9_-]{11})
            )
            |
            ^([a-zA-Z0-9_-]{11})$
        ",
        )
        .expect("Invalid regex")
    })
}

/// Extract the video id from a YouTube URL or bare id.
pub fn parse_video_id(input: &str) -> Result<String> {
    let caps = video_id_pattern()
        .captures(input.trim())
        .ok_or_else(|| TldwError::InvalidInput(format!("Not a YouTube video reference: {}", input)))?;

    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| TldwError::InvalidInput(format!("Not a YouTube video reference: {}", input)))
}
