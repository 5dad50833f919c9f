//! yt-dlp fetcher.
//!
//! Shells out to the `yt-dlp` binary. Enumeration uses `-J` (single JSON
//! document on stdout); downloads extract audio into the item workspace.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{FetchError, Fetcher};
use crate::config::DownloaderSettings;
use crate::domain::{AudioArtifact, Item, ItemMetadata};

/// File stem used for downloaded audio
const AUDIO_STEM: &str = "audio";

/// Fetcher backed by the yt-dlp CLI
pub struct YtDlpFetcher {
    settings: DownloaderSettings,
}

impl YtDlpFetcher {
    pub fn new(settings: DownloaderSettings) -> Self {
        Self { settings }
    }

    /// Run yt-dlp and return stdout, classifying any failure
    async fn run(&self, args: Vec<OsString>) -> Result<Vec<u8>, FetchError> {
        let limit = Duration::from_secs(self.settings.timeout_seconds);

        let child = Command::new(&self.settings.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    FetchError::unsupported(format!(
                        "{} is not installed or not on PATH",
                        self.settings.binary
                    ))
                } else {
                    FetchError::transient(format!("failed to spawn {}: {}", self.settings.binary, e))
                }
            })?;

        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| FetchError::transient(format!("yt-dlp timed out after {:?}", limit)))?
            .map_err(|e| FetchError::transient(format!("failed to wait for yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_stderr(stderr.trim()));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn enumerate(&self, source_url: &str, is_playlist: bool) -> Result<Vec<Item>, FetchError> {
        let mode = if is_playlist { "--flat-playlist" } else { "--no-playlist" };
        debug!(url = source_url, mode, "Enumerating with yt-dlp");

        let stdout = self
            .run(vec!["-J".into(), mode.into(), source_url.into()])
            .await?;

        let json = String::from_utf8_lossy(&stdout);
        parse_enumeration(&json, source_url, is_playlist)
    }

    async fn fetch(&self, item: &Item, dest_dir: &Path) -> Result<AudioArtifact, FetchError> {
        let template = dest_dir.join(format!("{}.%(ext)s", AUDIO_STEM));

        self.run(vec![
            "-f".into(),
            "bestaudio/best".into(),
            "-x".into(),
            "--audio-format".into(),
            self.settings.audio_format.clone().into(),
            "--no-playlist".into(),
            "--no-progress".into(),
            "-o".into(),
            template.into_os_string(),
            item.source_ref.clone().into(),
        ])
        .await?;

        let file_path = find_audio_file(dest_dir, &self.settings.audio_format)
            .await
            .ok_or_else(|| {
                FetchError::transient(format!(
                    "yt-dlp reported success but no audio file was written to {}",
                    dest_dir.display()
                ))
            })?;

        let byte_size = tokio::fs::metadata(&file_path)
            .await
            .map_err(|e| FetchError::transient(format!("cannot stat {}: {}", file_path.display(), e)))?
            .len();

        Ok(AudioArtifact {
            item_id: item.item_id.clone(),
            file_path,
            byte_size,
        })
    }
}

/// Subset of yt-dlp's `-J` output
#[derive(Debug, Deserialize)]
struct InfoJson {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    entries: Option<Vec<Option<InfoJson>>>,
}

impl InfoJson {
    fn page_url(&self) -> Option<&str> {
        self.webpage_url
            .as_deref()
            .or(self.url.as_deref())
            .filter(|u| !u.trim().is_empty())
    }

    fn into_item(self, page_url: String, playlist_url: Option<&str>, position: Option<u32>) -> Item {
        // Sources without a stable id get one derived from their URL
        let item_id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v5(&Uuid::NAMESPACE_URL, page_url.as_bytes()).to_string());

        Item::new(item_id, page_url).with_metadata(ItemMetadata {
            title: self.title,
            uploader: self.uploader,
            duration_seconds: self.duration,
            playlist_url: playlist_url.map(str::to_string),
            position,
        })
    }
}

/// Turn `yt-dlp -J` output into items
pub fn parse_enumeration(json: &str, source_url: &str, is_playlist: bool) -> Result<Vec<Item>, FetchError> {
    let info: InfoJson = serde_json::from_str(json)
        .map_err(|e| FetchError::transient(format!("unreadable yt-dlp output: {}", e)))?;

    let entries = match (is_playlist, info.entries) {
        (true, Some(entries)) => entries,
        (_, entries) => {
            // A single media page, or a playlist URL processed as one item
            let single = InfoJson { entries, ..info };
            let page_url = single
                .page_url()
                .unwrap_or(source_url)
                .to_string();
            return Ok(vec![single.into_item(page_url, None, None)]);
        }
    };

    let mut items = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let position = index as u32 + 1;
        let Some(entry) = entry else {
            warn!(position, "Skipping unavailable playlist entry");
            continue;
        };
        let Some(page_url) = entry.page_url().map(str::to_string) else {
            warn!(position, "Skipping playlist entry without a URL");
            continue;
        };
        items.push(entry.into_item(page_url, Some(source_url), Some(position)));
    }

    Ok(items)
}

/// Map yt-dlp stderr to a fetch error kind
pub fn classify_stderr(stderr: &str) -> FetchError {
    let lower = stderr.to_lowercase();
    let message = if stderr.is_empty() {
        "yt-dlp failed without output".to_string()
    } else {
        stderr.to_string()
    };

    if lower.contains("unsupported url") {
        FetchError::unsupported(message)
    } else if ["404", "not found", "unavailable", "does not exist", "private"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        FetchError::not_found(message)
    } else {
        FetchError::transient(message)
    }
}

/// Locate the extracted audio, preferring the requested format.
///
/// Without the preferred extension, the lexicographically first candidate
/// wins so the choice does not depend on directory order.
async fn find_audio_file(dir: &Path, preferred_ext: &str) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut candidates = Vec::new();

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.file_stem().and_then(|s| s.to_str()) != Some(AUDIO_STEM) {
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext == preferred_ext => return Some(path),
            Some("part") | Some("ytdl") | None => {}
            Some(_) => candidates.push(path),
        }
    }

    candidates.into_iter().min()
}
