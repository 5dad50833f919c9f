//! Domain types for the transcription pipeline.
//!
//! This module contains the core data structures:
//! - Item: One media unit and its downloaded audio
//! - Transcript: Timed segments produced for an item
//! - State: Per-item state machine
//! - Report: Run summary aggregated from item outcomes

pub mod item;
pub mod report;
pub mod state;
pub mod transcript;

// Re-export commonly used types
pub use item::{AudioArtifact, Item, ItemMetadata, RecordId};
pub use report::{ItemOutcome, ReportBuilder, RunReport};
pub use state::{transition, FailureKind, InvalidTransition, ItemEvent, ItemFailure, ItemState, Stage};
pub use transcript::{validate_segments, SegmentError, Transcript, TranscriptSegment};
