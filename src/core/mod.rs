//! Core orchestration logic.
//!
//! This module contains:
//! - Orchestrator: Drives items through download, transcribe and persist
//! - StageBudget: Per-stage attempt budgets and backoff
//! - ArtifactStore: Per-run temporary directories
//! - PipelineError: Errors that abort a run

pub mod artifact_store;
pub mod error;
pub mod orchestrator;
pub mod retry;

// Re-export commonly used types
pub use artifact_store::{item_slug, ArtifactStore, ItemWorkspace};
pub use error::{PipelineError, ResourceError};
pub use orchestrator::{Orchestrator, RunRequest, StageFailure};
pub use retry::StageBudget;
