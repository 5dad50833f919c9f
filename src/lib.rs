//! trackscribe - Playlist and track transcription pipeline
//!
//! Downloads audio for a track or every entry of a playlist, transcribes it
//! with a speech-to-text model, and stores the timed transcript in a
//! relational database.
//!
//! # Architecture
//!
//! Each item moves through an explicit state machine:
//! - Pending → Downloading → Downloaded → Transcribing → Transcribed →
//!   Persisting → Completed, or Failed at the stage that gave up
//! - Every stage has its own retry budget
//! - One item failing never stops its siblings
//!
//! # Modules
//!
//! - `adapters`: External system integrations (yt-dlp, whisper, SQLite)
//! - `core`: Orchestration logic (Orchestrator, StageBudget, ArtifactStore)
//! - `domain`: Data structures (Item, Transcript, ItemState, RunReport)
//! - `config`: Configuration loading
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Transcribe a whole playlist
//! trackscribe --url https://soundcloud.com/artist/sets/mixes --is-playlist run
//!
//! # Environment variables work too
//! URL=https://soundcloud.com/artist/track DATABASE_URL=sqlite://t.db trackscribe run --json
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{Fetcher, Transcriber, TranscriptStore};
pub use config::ConfigSet;
pub use core::{Orchestrator, PipelineError, RunRequest};
pub use domain::{Item, ItemOutcome, ItemState, RunReport, Transcript, TranscriptSegment};
