//! Items enumerated from a source URL.
//!
//! An item is one media unit within a run: a single track, or one entry of a
//! playlist.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One media unit to download, transcribe and store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Identifier unique within a run (the extractor's media id)
    pub item_id: String,

    /// URL the audio is fetched from
    pub source_ref: String,

    /// Descriptive metadata reported by the extractor
    #[serde(default)]
    pub metadata: ItemMetadata,
}

impl Item {
    /// Create an item with empty metadata
    pub fn new(item_id: impl Into<String>, source_ref: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            source_ref: source_ref.into(),
            metadata: ItemMetadata::default(),
        }
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: ItemMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Title if known, otherwise the item id
    pub fn display_name(&self) -> &str {
        self.metadata.title.as_deref().unwrap_or(&self.item_id)
    }
}

/// Track metadata carried through to the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub duration_seconds: Option<f64>,

    /// Playlist the item was enumerated from
    pub playlist_url: Option<String>,

    /// 1-based position within the playlist
    pub position: Option<u32>,
}

/// Audio file downloaded for an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub item_id: String,
    pub file_path: PathBuf,
    pub byte_size: u64,
}

/// Identifier of a stored transcript record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
