//! Adapter interfaces for external systems.
//!
//! The orchestrator only talks to the downloader, the speech-to-text model
//! and the relational store through these traits, so test doubles can stand
//! in for any of them.

pub mod sqlite;
pub mod whisper;
pub mod ytdlp;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{AudioArtifact, FailureKind, Item, RecordId, Transcript, TranscriptSegment};

// Re-export the concrete adapters
pub use sqlite::SqliteStore;
pub use whisper::WhisperTranscriber;
pub use ytdlp::YtDlpFetcher;

/// Why a download failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    NotFound,
    Transient,
    Unsupported,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NotFound, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Transient, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unsupported, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FetchErrorKind::Transient
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self.kind {
            FetchErrorKind::NotFound => FailureKind::NotFound,
            FetchErrorKind::Transient => FailureKind::Transient,
            FetchErrorKind::Unsupported => FailureKind::Unsupported,
        }
    }
}

/// Why a transcription failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscribeErrorKind {
    ModelFailure,
    UnsupportedFormat,
    Transient,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct TranscribeError {
    pub kind: TranscribeErrorKind,
    pub message: String,
}

impl TranscribeError {
    pub fn new(kind: TranscribeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn model_failure(message: impl Into<String>) -> Self {
        Self::new(TranscribeErrorKind::ModelFailure, message)
    }

    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::new(TranscribeErrorKind::UnsupportedFormat, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(TranscribeErrorKind::Transient, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == TranscribeErrorKind::Transient
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self.kind {
            TranscribeErrorKind::ModelFailure => FailureKind::ModelFailure,
            TranscribeErrorKind::UnsupportedFormat => FailureKind::UnsupportedFormat,
            TranscribeErrorKind::Transient => FailureKind::Transient,
        }
    }
}

/// Why a store write failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistErrorKind {
    ConnectionLost,
    ConstraintViolation,
    Transient,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct PersistError {
    pub kind: PersistErrorKind,
    pub message: String,
}

impl PersistError {
    pub fn new(kind: PersistErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::new(PersistErrorKind::ConnectionLost, message)
    }

    pub fn constraint_violation(message: impl Into<String>) -> Self {
        Self::new(PersistErrorKind::ConstraintViolation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(PersistErrorKind::Transient, message)
    }

    /// Store unavailability is usually temporary, so dropped connections retry too
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            PersistErrorKind::Transient | PersistErrorKind::ConnectionLost
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self.kind {
            PersistErrorKind::ConnectionLost => FailureKind::ConnectionLost,
            PersistErrorKind::ConstraintViolation => FailureKind::ConstraintViolation,
            PersistErrorKind::Transient => FailureKind::Transient,
        }
    }
}

/// Output of a transcriber
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptionOutput {
    /// Segments in playback order
    pub segments: Vec<TranscriptSegment>,

    /// Detected or forced language code
    pub language: Option<String>,
}

/// Enumerates and downloads media
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// List the items behind a URL. A non-playlist URL yields one item.
    async fn enumerate(&self, source_url: &str, is_playlist: bool) -> Result<Vec<Item>, FetchError>;

    /// Download an item's audio into `dest_dir`
    async fn fetch(&self, item: &Item, dest_dir: &Path) -> Result<AudioArtifact, FetchError>;
}

/// Speech-to-text engine
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(&self, audio: &AudioArtifact) -> Result<TranscriptionOutput, TranscribeError>;
}

/// Relational transcript store
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    fn name(&self) -> &str;

    /// Write a transcript in one transaction
    async fn save(&self, transcript: &Transcript) -> Result<RecordId, PersistError>;

    /// Existing transcript record for a source, if any
    async fn find_existing(&self, source_ref: &str) -> Result<Option<RecordId>, PersistError>;
}
