//! YouTube captions via yt-dlp.

use super::{flatten_vtt, CaptionKind, CaptionSource, CaptionTrack};
use crate::config::YoutubeSettings;
use crate::error::{Result, TldwError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Markers in yt-dlp's stderr for videos that will never have captions.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "Video unavailable",
    "Private video",
    "This video has been removed",
    "Incomplete YouTube ID",
    "is not a valid URL",
];

/// Caption source backed by the yt-dlp binary.
pub struct YoutubeCaptionSource {
    ytdlp_path: String,
    allow_automatic: bool,
    work_dir: PathBuf,
}

impl YoutubeCaptionSource {
    pub fn new(settings: &YoutubeSettings, work_dir: PathBuf) -> Self {
        Self {
            ytdlp_path: settings.ytdlp_path.clone(),
            allow_automatic: settings.allow_automatic_captions,
            work_dir,
        }
    }

    /// Download one kind of subtitle track into `dir`.
    async fn download(
        &self,
        video_id: &str,
        language: &str,
        kind: CaptionKind,
        dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let url = format!("https://www.youtube.com/watch?v={}", video_id);
        let template = dir.join("%(id)s.%(ext)s");
        let subs_flag = match kind {
            CaptionKind::Manual => "--write-subs",
            CaptionKind::Automatic => "--write-auto-subs",
        };

        let result = Command::new(&self.ytdlp_path)
            .arg(subs_flag)
            .arg("--sub-langs").arg(language)
            .arg("--sub-format").arg("vtt")
            .arg("--skip-download")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--output").arg(template.to_string_lossy().as_ref())
            .arg(&url)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match result {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TldwError::ToolNotFound(self.ytdlp_path.clone()));
            }
            Err(e) => {
                return Err(TldwError::CaptionSource(format!("yt-dlp execution failed: {e}")));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if UNAVAILABLE_MARKERS.iter().any(|m| stderr.contains(m)) {
                return Err(TldwError::InvalidInput(format!(
                    "Video {} is unavailable: {}",
                    video_id,
                    stderr.trim()
                )));
            }
            return Err(TldwError::CaptionSource(format!("yt-dlp failed: {stderr}")));
        }

        find_subtitle_file(dir, video_id)
    }
}

/// Locate a downloaded `.vtt` file for `video_id`.
fn find_subtitle_file(dir: &Path, video_id: &str) -> Result<Option<PathBuf>> {
    let entries = std::fs::read_dir(dir)?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(video_id) && name.ends_with(".vtt") {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

#[async_trait]
impl CaptionSource for YoutubeCaptionSource {
    #[instrument(skip(self))]
    async fn fetch_captions(&self, video_id: &str, language: &str) -> Result<Option<CaptionTrack>> {
        std::fs::create_dir_all(&self.work_dir)?;
        let dir = tempfile::Builder::new()
            .prefix("captions-")
            .tempdir_in(&self.work_dir)?;

        let mut kinds = vec![CaptionKind::Manual];
        if self.allow_automatic {
            kinds.push(CaptionKind::Automatic);
        }

        for kind in kinds {
            let Some(path) = self.download(video_id, language, kind, dir.path()).await? else {
                debug!(?kind, "No caption track");
                continue;
            };

            let text = flatten_vtt(&tokio::fs::read_to_string(&path).await?);
            if text.trim().is_empty() {
                debug!(?kind, "Caption track is empty");
                continue;
            }

            info!(?kind, chars = text.len(), "Fetched captions");
            return Ok(Some(CaptionTrack { text, kind }));
        }

        Ok(None)
    }

    fn name(&self) -> &'static str {
        "youtube"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_subtitle_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("abc123def45.en.vtt"), "WEBVTT\n\n").unwrap();
        std::fs::write(dir.path().join("other.en.vtt"), "WEBVTT\n\n").unwrap();

        let found = find_subtitle_file(dir.path(), "abc123def45").unwrap().unwrap();
        assert!(found.ends_with("abc123def45.en.vtt"));
        assert!(find_subtitle_file(dir.path(), "zzzzzzzzzzz").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let dir = TempDir::new().unwrap();
        let settings = YoutubeSettings {
            ytdlp_path: "definitely-not-yt-dlp-binary".to_string(),
            allow_automatic_captions: true,
        };
        let source = YoutubeCaptionSource::new(&settings, dir.path().to_path_buf());

        let err = source.fetch_captions("abc123def45", "en").await.unwrap_err();
        assert!(matches!(err, TldwError::ToolNotFound(_)));
    }
}
