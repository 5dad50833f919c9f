//! Run-level and artifact errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::adapters::{FetchError, PersistError};

/// Errors that abort a run before any item work
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to enumerate items from {url}: {source}")]
    Enumeration {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Transcript store unavailable: {0}")]
    Store(#[source] PersistError),

    #[error("Artifact store error: {0}")]
    Resource(#[from] ResourceError),
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Process exit code for setup failures
    pub fn exit_code(&self) -> i32 {
        2
    }
}

/// Temporary artifact errors (never retried)
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Artifact path already reserved for item '{item_id}': {}", path.display())]
    PathCollision { item_id: String, path: PathBuf },

    #[error("Insufficient disk space in {}: {available} bytes available, {required} required", path.display())]
    InsufficientSpace {
        path: PathBuf,
        available: u64,
        required: u64,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResourceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
