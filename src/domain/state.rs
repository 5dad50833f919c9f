//! Per-item processing state and its transition function.
//!
//! The orchestrator owns one `ItemState` per item and only ever changes it
//! through [`transition`]. Transitions are monotonic: the single backwards
//! edge is an explicit `Retry` from `Failed`, which returns the item to the
//! entry state of the stage that failed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline stage an item can fail in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Transcribe,
    Persist,

    /// Never dispatched (run cancelled first)
    Dispatch,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Download => "download",
            Stage::Transcribe => "transcribe",
            Stage::Persist => "persist",
            Stage::Dispatch => "dispatch",
        };
        f.write_str(name)
    }
}

/// Classified cause of an item failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Unsupported,
    ModelFailure,
    UnsupportedFormat,
    ConnectionLost,
    ConstraintViolation,
    Transient,
    Resource,
    Cancelled,
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Terminal failure details for an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(stage: Stage, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed ({}): {}", self.stage, self.kind, self.reason)
    }
}

/// Processing state of one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ItemState {
    Pending,
    Downloading,
    Downloaded,
    Transcribing,
    Transcribed,
    Persisting,
    Completed,
    Failed(ItemFailure),
}

impl Default for ItemState {
    fn default() -> Self {
        Self::Pending
    }
}

impl ItemState {
    /// Completed or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Completed | ItemState::Failed(_))
    }

    /// Stage being worked on, for the three working states
    pub fn active_stage(&self) -> Option<Stage> {
        match self {
            ItemState::Downloading => Some(Stage::Download),
            ItemState::Transcribing => Some(Stage::Transcribe),
            ItemState::Persisting => Some(Stage::Persist),
            _ => None,
        }
    }

    /// The stage an item in this state will run next (or is running)
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            ItemState::Pending | ItemState::Downloading => Some(Stage::Download),
            ItemState::Downloaded | ItemState::Transcribing => Some(Stage::Transcribe),
            ItemState::Transcribed | ItemState::Persisting => Some(Stage::Persist),
            ItemState::Completed | ItemState::Failed(_) => None,
        }
    }
}

/// Input to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemEvent {
    /// Start the next stage
    Begin,

    /// The store already holds a transcript for this source
    AlreadyStored,

    /// The active stage finished
    StageSucceeded,

    /// The active stage failed
    StageFailed { kind: FailureKind, reason: String },

    /// Re-enter the stage that failed
    Retry,

    /// Run cancelled before the item was dispatched
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid item transition: {event:?} in state {from:?}")]
pub struct InvalidTransition {
    pub from: ItemState,
    pub event: ItemEvent,
}

/// Compute the next state. Pure; never touches adapters.
pub fn transition(state: &ItemState, event: &ItemEvent) -> Result<ItemState, InvalidTransition> {
    use ItemEvent as E;
    use ItemState as S;

    let next = match (state, event) {
        (S::Pending, E::Begin) => S::Downloading,
        (S::Pending, E::AlreadyStored) => S::Completed,
        (S::Pending, E::Cancel) => S::Failed(ItemFailure::new(
            Stage::Dispatch,
            FailureKind::Cancelled,
            "run cancelled before the item was dispatched",
        )),

        (S::Downloading, E::StageSucceeded) => S::Downloaded,
        (S::Downloaded, E::Begin) => S::Transcribing,
        (S::Transcribing, E::StageSucceeded) => S::Transcribed,
        (S::Transcribed, E::Begin) => S::Persisting,
        (S::Persisting, E::StageSucceeded) => S::Completed,

        (S::Downloading | S::Transcribing | S::Persisting, E::StageFailed { kind, reason }) => {
            // active_stage is Some for exactly these three states
            let stage = state.active_stage().unwrap_or(Stage::Dispatch);
            S::Failed(ItemFailure::new(stage, *kind, reason.clone()))
        }

        (S::Failed(failure), E::Retry) => match failure.stage {
            Stage::Download => S::Downloading,
            Stage::Transcribe => S::Transcribing,
            Stage::Persist => S::Persisting,
            Stage::Dispatch => {
                return Err(InvalidTransition {
                    from: state.clone(),
                    event: event.clone(),
                })
            }
        },

        _ => {
            return Err(InvalidTransition {
                from: state.clone(),
                event: event.clone(),
            })
        }
    };

    Ok(next)
}
