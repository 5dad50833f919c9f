//! Whisper transcription backend.
//!
//! Shells out to the local `whisper` binary and reads its JSON output from a
//! scratch directory that is removed when the call returns.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{TranscribeError, Transcriber, TranscriptionOutput};
use crate::config::TranscriberSettings;
use crate::domain::{AudioArtifact, TranscriptSegment};

/// Transcriber backed by the whisper CLI
pub struct WhisperTranscriber {
    settings: TranscriberSettings,
}

impl WhisperTranscriber {
    pub fn new(settings: TranscriberSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn transcribe(&self, audio: &AudioArtifact) -> Result<TranscriptionOutput, TranscribeError> {
        let limit = Duration::from_secs(self.settings.timeout_seconds);
        let scratch = tempfile::tempdir()
            .map_err(|e| TranscribeError::transient(format!("failed to create temp dir: {}", e)))?;

        let mut command = Command::new(&self.settings.binary);
        command
            .arg(&audio.file_path)
            .arg("--model")
            .arg(&self.settings.model)
            .arg("--output_dir")
            .arg(scratch.path())
            .arg("--output_format")
            .arg("json");
        if let Some(language) = &self.settings.language {
            command.arg("--language").arg(language);
        }

        debug!(
            audio = %audio.file_path.display(),
            model = %self.settings.model,
            "Running whisper"
        );

        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    TranscribeError::model_failure(format!(
                        "{} is not installed or not on PATH",
                        self.settings.binary
                    ))
                } else {
                    TranscribeError::transient(format!("failed to spawn whisper: {}", e))
                }
            })?;

        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| TranscribeError::transient(format!("whisper timed out after {:?}", limit)))?
            .map_err(|e| TranscribeError::transient(format!("failed to wait for whisper: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_stderr(stderr.trim()));
        }

        let json_path = output_path(scratch.path(), &audio.file_path);
        let json = tokio::fs::read_to_string(&json_path).await.map_err(|e| {
            TranscribeError::model_failure(format!(
                "whisper output {} unreadable: {}",
                json_path.display(),
                e
            ))
        })?;

        parse_whisper_output(&json)
    }
}

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    #[serde(default)]
    text: String,
}

fn output_path(dir: &Path, audio: &Path) -> std::path::PathBuf {
    let stem = audio.file_stem().unwrap_or_default().to_string_lossy();
    dir.join(format!("{}.json", stem))
}

/// Parse whisper JSON into ordered, non-overlapping segments
pub fn parse_whisper_output(json: &str) -> Result<TranscriptionOutput, TranscribeError> {
    let output: WhisperOutput = serde_json::from_str(json)
        .map_err(|e| TranscribeError::model_failure(format!("failed to parse whisper JSON: {}", e)))?;

    let language = output.language.filter(|l| !l.trim().is_empty());

    Ok(TranscriptionOutput {
        segments: normalize_segments(&output.segments),
        language,
    })
}

/// Drop empty or zero-length segments and clamp overlaps onto the previous end
fn normalize_segments(raw: &[WhisperSegment]) -> Vec<TranscriptSegment> {
    let mut segments: Vec<TranscriptSegment> = Vec::with_capacity(raw.len());

    for segment in raw {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }

        let mut start_ms = seconds_to_ms(segment.start);
        let end_ms = seconds_to_ms(segment.end);
        if let Some(previous) = segments.last() {
            start_ms = start_ms.max(previous.end_ms);
        }
        if end_ms <= start_ms {
            continue;
        }

        segments.push(TranscriptSegment::new(start_ms, end_ms, text));
    }

    segments
}

fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}

/// Map whisper stderr to a transcription error kind
pub fn classify_stderr(stderr: &str) -> TranscribeError {
    let lower = stderr.to_lowercase();
    let message = if stderr.is_empty() {
        "whisper failed without output".to_string()
    } else {
        stderr.to_string()
    };

    if lower.contains("out of memory") {
        TranscribeError::transient(message)
    } else if ["invalid data", "could not open", "unsupported"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        TranscribeError::unsupported_format(message)
    } else {
        TranscribeError::model_failure(message)
    }
}
