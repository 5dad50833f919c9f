//! Per-run temporary artifacts.
//!
//! Layout for a run:
//!
//! ```text
//! <audio_dir>/<run_id>/<item-slug>/audio.<ext>
//! <transcript_dir>/<run_id>/<item-slug>.json
//! ```
//!
//! Item slugs embed a hash of the item id, so two distinct ids never share a
//! path even when their sanitized forms collide. Reserving the same id twice
//! within a run is a `PathCollision`.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::Transcript;

use super::error::ResourceError;

/// Longest sanitized id prefix kept in a slug
const SLUG_PREFIX_LEN: usize = 48;

/// Paths reserved for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemWorkspace {
    pub item_id: String,

    /// Directory the fetcher writes audio into
    pub audio_dir: PathBuf,

    /// Where the transcript hand-off file is written
    pub transcript_path: PathBuf,
}

/// Temporary directory manager for one run
#[derive(Debug)]
pub struct ArtifactStore {
    run_id: Uuid,
    audio_root: PathBuf,
    transcript_root: PathBuf,
    min_free_bytes: u64,
    reserved: Mutex<HashSet<String>>,
}

impl ArtifactStore {
    /// Create the run directories
    pub async fn open(
        audio_dir: &Path,
        transcript_dir: &Path,
        run_id: Uuid,
        min_free_bytes: u64,
    ) -> Result<Self, ResourceError> {
        let audio_root = audio_dir.join(run_id.to_string());
        let transcript_root = transcript_dir.join(run_id.to_string());

        for dir in [&audio_root, &transcript_root] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| ResourceError::io(dir, e))?;
        }

        debug!(
            %run_id,
            audio = %audio_root.display(),
            transcripts = %transcript_root.display(),
            "Artifact directories created"
        );

        Ok(Self {
            run_id,
            audio_root,
            transcript_root,
            min_free_bytes,
            reserved: Mutex::new(HashSet::new()),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Audio directory for this run
    pub fn audio_root(&self) -> &Path {
        &self.audio_root
    }

    /// Transcript directory for this run
    pub fn transcript_root(&self) -> &Path {
        &self.transcript_root
    }

    /// Reserve the workspace for an item and create its audio directory
    pub async fn reserve(&self, item_id: &str) -> Result<ItemWorkspace, ResourceError> {
        let slug = item_slug(item_id);
        let workspace = ItemWorkspace {
            item_id: item_id.to_string(),
            audio_dir: self.audio_root.join(&slug),
            transcript_path: self.transcript_root.join(format!("{}.json", slug)),
        };

        {
            let mut reserved = self
                .reserved
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !reserved.insert(slug.clone()) {
                return Err(ResourceError::PathCollision {
                    item_id: item_id.to_string(),
                    path: workspace.audio_dir,
                });
            }
        }

        self.check_free_space()?;

        fs::create_dir_all(&workspace.audio_dir)
            .await
            .map_err(|e| ResourceError::io(&workspace.audio_dir, e))?;

        Ok(workspace)
    }

    /// Remove partial downloads before a retry
    pub async fn clear_audio(&self, workspace: &ItemWorkspace) -> Result<(), ResourceError> {
        remove_dir_if_present(&workspace.audio_dir).await?;
        fs::create_dir_all(&workspace.audio_dir)
            .await
            .map_err(|e| ResourceError::io(&workspace.audio_dir, e))
    }

    /// Write the transcript hand-off file
    pub async fn write_transcript(
        &self,
        workspace: &ItemWorkspace,
        transcript: &Transcript,
    ) -> Result<PathBuf, ResourceError> {
        let json = serde_json::to_vec_pretty(transcript).map_err(|e| {
            ResourceError::io(&workspace.transcript_path, std::io::Error::new(ErrorKind::InvalidData, e))
        })?;

        fs::write(&workspace.transcript_path, json)
            .await
            .map_err(|e| ResourceError::io(&workspace.transcript_path, e))?;

        Ok(workspace.transcript_path.clone())
    }

    /// Delete everything written for an item
    pub async fn release(&self, workspace: &ItemWorkspace) -> Result<(), ResourceError> {
        remove_dir_if_present(&workspace.audio_dir).await?;
        remove_file_if_present(&workspace.transcript_path).await?;
        debug!(item_id = %workspace.item_id, "Item artifacts released");
        Ok(())
    }

    /// Remove the run directories and anything left in them
    pub async fn close(self) -> Result<(), ResourceError> {
        let mut first_error = None;

        for dir in [&self.audio_root, &self.transcript_root] {
            if let Err(e) = remove_dir_if_present(dir).await {
                warn!(dir = %dir.display(), error = %e, "Failed to remove run directory");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn check_free_space(&self) -> Result<(), ResourceError> {
        if self.min_free_bytes == 0 {
            return Ok(());
        }

        let available = fs2::available_space(&self.audio_root)
            .map_err(|e| ResourceError::io(&self.audio_root, e))?;

        if available < self.min_free_bytes {
            return Err(ResourceError::InsufficientSpace {
                path: self.audio_root.clone(),
                available,
                required: self.min_free_bytes,
            });
        }

        Ok(())
    }
}

/// Filesystem-safe, collision-free name for an item id
pub fn item_slug(item_id: &str) -> String {
    let prefix: String = item_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(SLUG_PREFIX_LEN)
        .collect();

    let digest = Sha256::digest(item_id.as_bytes());
    format!("{}-{}", prefix, hex::encode(&digest[..4]))
}

async fn remove_dir_if_present(path: &Path) -> Result<(), ResourceError> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ResourceError::io(path, e)),
    }
}

async fn remove_file_if_present(path: &Path) -> Result<(), ResourceError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ResourceError::io(path, e)),
    }
}
