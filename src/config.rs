//! Pipeline configuration.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags, which also read the environment variables
//!    `URL`, `IS_PLAYLIST`, `DATABASE_URL`, `LOG_LEVEL`, ... (see `cli`)
//! 2. Config file (`--config`, `./trackscribe.yaml`, or
//!    `<config_dir>/trackscribe/config.yaml`)
//! 3. Defaults
//!
//! The resolved [`ConfigSet`] is an immutable value handed to the
//! orchestrator at construction. Nothing here is cached process-wide.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::core::retry::StageBudget;

/// Name of the config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "trackscribe.yaml";

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    /// Directive string for `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Settings for the yt-dlp fetcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderSettings {
    /// yt-dlp executable
    pub binary: String,

    /// Audio format passed to `--audio-format`
    pub audio_format: String,

    /// Per-invocation timeout
    pub timeout_seconds: u64,
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            audio_format: "wav".to_string(),
            timeout_seconds: 600,
        }
    }
}

/// Settings for the whisper transcriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberSettings {
    /// whisper executable
    pub binary: String,

    /// Model name (tiny, base, small, medium, large-v2, ...)
    pub model: String,

    /// Force a language instead of auto-detecting
    pub language: Option<String>,

    pub timeout_seconds: u64,
}

impl Default for TranscriberSettings {
    fn default() -> Self {
        Self {
            binary: "whisper".to_string(),
            model: "base".to_string(),
            language: None,
            timeout_seconds: 3600,
        }
    }
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSet {
    /// JSON logs instead of human-readable output
    pub production: bool,
    pub log_level: LogLevel,

    /// Additional log destination
    pub log_file: Option<PathBuf>,

    /// Source URL to process
    pub url: Option<String>,
    pub is_playlist: bool,

    pub database_url: String,

    /// Root for temporary files
    pub tmp_dir: PathBuf,

    /// Downloaded audio (defaults to `<tmp_dir>/audio`)
    pub audio_dir: Option<PathBuf>,

    /// Transcript hand-off files (defaults to `<tmp_dir>/transcripts`)
    pub transcript_dir: Option<PathBuf>,

    /// Attempts for the download and transcribe stages (including the first try)
    pub max_retries: u32,

    /// Attempts for the persist stage (including the first try)
    pub persist_max_attempts: u32,

    /// First backoff for download and transcribe retries
    pub retry_delay_ms: u64,

    /// First backoff for persist retries
    pub persist_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub backoff_multiplier: f64,

    /// Items processed concurrently
    pub worker_count: usize,

    /// Complete items whose source is already in the store without reprocessing
    pub skip_existing: bool,

    /// Exit non-zero when any item failed, even if others completed
    pub fail_on_partial: bool,

    /// Free disk space required before reserving an item workspace
    pub min_free_bytes: u64,

    pub downloader: DownloaderSettings,
    pub transcriber: TranscriberSettings,
}

impl Default for ConfigSet {
    fn default() -> Self {
        Self {
            production: false,
            log_level: LogLevel::default(),
            log_file: None,
            url: None,
            is_playlist: false,
            database_url: "sqlite://trackscribe.db".to_string(),
            tmp_dir: PathBuf::from("tmp"),
            audio_dir: None,
            transcript_dir: None,
            max_retries: 2,
            persist_max_attempts: 3,
            retry_delay_ms: 500,
            persist_retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            worker_count: 1,
            skip_existing: true,
            fail_on_partial: false,
            min_free_bytes: 64 * 1024 * 1024,
            downloader: DownloaderSettings::default(),
            transcriber: TranscriberSettings::default(),
        }
    }
}

impl ConfigSet {
    /// Parse a config file body
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config YAML")
    }

    /// Load a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load from an explicit path, the default locations, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match find_config_file() {
                Some(path) => Self::from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.audio_dir
            .clone()
            .unwrap_or_else(|| self.tmp_dir.join("audio"))
    }

    pub fn transcript_dir(&self) -> PathBuf {
        self.transcript_dir
            .clone()
            .unwrap_or_else(|| self.tmp_dir.join("transcripts"))
    }

    /// Attempt budget for the download stage (and enumeration)
    pub fn download_budget(&self) -> StageBudget {
        StageBudget::new(
            self.max_retries,
            self.retry_delay_ms,
            self.max_retry_delay_ms,
            self.backoff_multiplier,
        )
    }

    /// Attempt budget for the transcribe stage
    pub fn transcribe_budget(&self) -> StageBudget {
        self.download_budget()
    }

    /// Attempt budget for the persist stage
    pub fn persist_budget(&self) -> StageBudget {
        StageBudget::new(
            self.persist_max_attempts,
            self.persist_retry_delay_ms,
            self.max_retry_delay_ms,
            self.backoff_multiplier,
        )
    }

    /// Check the configuration, collecting every problem
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.database_url.trim().is_empty() {
            problems.push("database_url must not be empty".to_string());
        }
        if self.tmp_dir.as_os_str().is_empty() {
            problems.push("tmp_dir must not be empty".to_string());
        }
        if self.audio_dir() == self.transcript_dir() {
            problems.push("audio_dir and transcript_dir must differ".to_string());
        }
        if self.max_retries == 0 {
            problems.push("max_retries must be at least 1".to_string());
        }
        if self.persist_max_attempts == 0 {
            problems.push("persist_max_attempts must be at least 1".to_string());
        }
        if self.worker_count == 0 {
            problems.push("worker_count must be at least 1".to_string());
        }
        if !(self.backoff_multiplier >= 1.0) {
            problems.push("backoff_multiplier must be >= 1.0".to_string());
        }
        if self.downloader.binary.trim().is_empty() {
            problems.push("downloader.binary must not be empty".to_string());
        }
        if self.transcriber.binary.trim().is_empty() {
            problems.push("transcriber.binary must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    /// Print the resolved configuration
    pub fn display(&self) {
        println!("Resolved configuration:");
        println!("  URL:              {}", self.url.as_deref().unwrap_or("(not set)"));
        println!("  Playlist:         {}", self.is_playlist);
        println!("  Database:         {}", self.database_url);
        println!("  Audio dir:        {}", self.audio_dir().display());
        println!("  Transcript dir:   {}", self.transcript_dir().display());
        println!("  Workers:          {}", self.worker_count);
        println!("  Max retries:      {}", self.max_retries);
        println!("  Persist attempts: {}", self.persist_max_attempts);
        println!("  Skip existing:    {}", self.skip_existing);
        println!("  Log level:        {}", self.log_level.as_filter());
        println!("  Production:       {}", self.production);
        println!(
            "  Downloader:       {} ({})",
            self.downloader.binary, self.downloader.audio_format
        );
        println!(
            "  Transcriber:      {} (model {})",
            self.transcriber.binary, self.transcriber.model
        );
    }
}

/// Find a config file in the working directory, then the user config directory
fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }

    let user = dirs::config_dir()?.join("trackscribe").join("config.yaml");
    user.exists().then_some(user)
}
