//! Timed transcript segments and the transcript assembled for an item.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::item::{Item, ItemMetadata};

/// A span of recognized speech
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// Segment ordering violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("segment {index} ends at {end_ms}ms, not after its start {start_ms}ms")]
    EmptySpan {
        index: usize,
        start_ms: u64,
        end_ms: u64,
    },

    #[error("segment {index} starts at {start_ms}ms, before the previous segment ends at {previous_end_ms}ms")]
    Overlap {
        index: usize,
        start_ms: u64,
        previous_end_ms: u64,
    },
}

/// Ordered, non-overlapping segments for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub item_id: String,
    pub source_ref: String,
    pub segments: Vec<TranscriptSegment>,

    /// Language detected by the model, if reported
    pub language: Option<String>,

    #[serde(default)]
    pub metadata: ItemMetadata,
}

impl Transcript {
    /// Assemble a transcript for an item, checking segment order.
    ///
    /// An empty segment list is valid.
    pub fn new(
        item: &Item,
        segments: Vec<TranscriptSegment>,
        language: Option<String>,
    ) -> Result<Self, SegmentError> {
        validate_segments(&segments)?;
        Ok(Self {
            item_id: item.item_id.clone(),
            source_ref: item.source_ref.clone(),
            segments,
            language,
            metadata: item.metadata.clone(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment texts joined with single spaces
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// End of the last segment
    pub fn duration_ms(&self) -> u64 {
        self.segments.last().map(|s| s.end_ms).unwrap_or(0)
    }
}

/// Check that every segment has a positive span and that segments do not overlap
pub fn validate_segments(segments: &[TranscriptSegment]) -> Result<(), SegmentError> {
    let mut previous_end: Option<u64> = None;

    for (index, segment) in segments.iter().enumerate() {
        if segment.end_ms <= segment.start_ms {
            return Err(SegmentError::EmptySpan {
                index,
                start_ms: segment.start_ms,
                end_ms: segment.end_ms,
            });
        }

        if let Some(previous_end_ms) = previous_end {
            if segment.start_ms < previous_end_ms {
                return Err(SegmentError::Overlap {
                    index,
                    start_ms: segment.start_ms,
                    previous_end_ms,
                });
            }
        }

        previous_end = Some(segment.end_ms);
    }

    Ok(())
}
