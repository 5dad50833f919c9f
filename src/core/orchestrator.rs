//! Main orchestrator for transcription runs.
//!
//! Enumerates the items behind a URL, then drives every item through
//! download → transcribe → persist with per-stage retry budgets. Item
//! failures are recorded in the run report and never abort sibling items.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::adapters::sqlite::DatabaseLocation;
use crate::adapters::{
    FetchError, Fetcher, PersistError, SqliteStore, TranscribeError, Transcriber, TranscriptStore,
    WhisperTranscriber, YtDlpFetcher,
};
use crate::config::ConfigSet;
use crate::domain::{
    transition, FailureKind, Item, ItemEvent, ItemFailure, ItemOutcome, ItemState, RecordId,
    ReportBuilder, RunReport, Stage, Transcript,
};

use super::artifact_store::{ArtifactStore, ItemWorkspace};
use super::error::{PipelineError, ResourceError};
use super::retry::StageBudget;

/// What to process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub source_url: String,
    pub is_playlist: bool,
}

impl RunRequest {
    pub fn new(source_url: impl Into<String>, is_playlist: bool) -> Self {
        Self {
            source_url: source_url.into(),
            is_playlist,
        }
    }

    /// Build a request from the `url` and `is_playlist` configuration keys
    pub fn from_config(config: &ConfigSet) -> Result<Self, PipelineError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| PipelineError::configuration("url is not set"))?;
        Ok(Self::new(url, config.is_playlist))
    }
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    config: Arc<ConfigSet>,
    fetcher: Arc<dyn Fetcher>,
    transcriber: Arc<dyn Transcriber>,
    store: Arc<dyn TranscriptStore>,
}

impl Orchestrator {
    /// Create an orchestrator over the given adapters
    pub fn new(
        config: ConfigSet,
        fetcher: Arc<dyn Fetcher>,
        transcriber: Arc<dyn Transcriber>,
        store: Arc<dyn TranscriptStore>,
    ) -> Result<Self, PipelineError> {
        validate_config(&config)?;

        Ok(Self {
            config: Arc::new(config),
            fetcher,
            transcriber,
            store,
        })
    }

    /// Create an orchestrator backed by yt-dlp, whisper and SQLite
    ///
    /// The configuration is checked before the database is opened, so a
    /// rejected config leaves nothing on disk.
    pub fn with_default_adapters(config: ConfigSet) -> Result<Self, PipelineError> {
        validate_config(&config)?;

        let fetcher = Arc::new(YtDlpFetcher::new(config.downloader.clone()));
        let transcriber = Arc::new(WhisperTranscriber::new(config.transcriber.clone()));
        let location =
            DatabaseLocation::parse(&config.database_url).map_err(PipelineError::Configuration)?;
        let store = Arc::new(SqliteStore::open_location(&location).map_err(PipelineError::Store)?);

        Self::new(config, fetcher, transcriber, store)
    }

    pub fn config(&self) -> &ConfigSet {
        &self.config
    }

    /// Execute a run to completion
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, PipelineError> {
        self.run_with_cancel(request, CancellationToken::new()).await
    }

    /// Execute a run that stops dispatching items once `cancel` fires
    #[instrument(skip(self, request, cancel), fields(url = %request.source_url, playlist = request.is_playlist))]
    pub async fn run_with_cancel(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, "Starting transcription run");

        validate_request(&request)?;
        let mut report = ReportBuilder::new(run_id, request.source_url.clone());

        let items = self.enumerate(&request, &cancel).await?;
        if !request.is_playlist && items.len() != 1 {
            return Err(PipelineError::configuration(format!(
                "expected exactly one item for non-playlist URL {}, found {}",
                request.source_url,
                items.len()
            )));
        }
        check_item_ids(&items)?;

        report.set_total(items.len());
        if items.is_empty() {
            warn!(url = %request.source_url, "No entries found in playlist");
            report.warn(format!("No entries found in playlist: {}", request.source_url));
            return Ok(report.finish());
        }

        info!(%run_id, item_count = items.len(), "Items enumerated");

        let artifacts = ArtifactStore::open(
            &self.config.audio_dir(),
            &self.config.transcript_dir(),
            run_id,
            self.config.min_free_bytes,
        )
        .await?;

        self.process_items(&items, &artifacts, &cancel, &mut report)
            .await;

        if let Err(e) = artifacts.close().await {
            error!(%run_id, error = %e, "Failed to remove run artifacts");
            report.warn(format!("Artifact cleanup failed: {}", e));
        }

        let report = report.finish();
        info!(
            %run_id,
            total = report.total_items,
            succeeded = report.succeeded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Run finished"
        );

        Ok(report)
    }

    /// Enumerate items, retrying transient failures with the download budget
    async fn enumerate(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<Item>, PipelineError> {
        let budget = self.config.download_budget();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self
                .fetcher
                .enumerate(&request.source_url, request.is_playlist)
                .await
            {
                Ok(items) => return Ok(items),
                Err(e) if e.is_retryable() && budget.allows_another(attempt) => {
                    let delay = budget.backoff_after(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Enumeration failed, retrying"
                    );
                    if !wait_or_cancel(delay, cancel).await {
                        return Err(PipelineError::Enumeration {
                            url: request.source_url.clone(),
                            source: e,
                        });
                    }
                }
                Err(e) => {
                    return Err(PipelineError::Enumeration {
                        url: request.source_url.clone(),
                        source: e,
                    })
                }
            }
        }
    }

    /// Process items with bounded concurrency and record every outcome
    async fn process_items(
        &self,
        items: &[Item],
        artifacts: &ArtifactStore,
        cancel: &CancellationToken,
        report: &mut ReportBuilder,
    ) {
        let total = items.len();
        let workers = self.config.worker_count.max(1);

        let mut outcomes = stream::iter(items.iter())
            .map(move |item| async move {
                // Checked when a worker slot picks the item up
                if cancel.is_cancelled() {
                    return cancelled_outcome(item);
                }
                self.process_item(item, artifacts, cancel).await
            })
            .buffer_unordered(workers);

        while let Some(outcome) = outcomes.next().await {
            match &outcome {
                ItemOutcome::Completed { item_id, record_id, skipped } => {
                    info!(%item_id, %record_id, skipped, "Item completed");
                }
                ItemOutcome::Failed { item_id, failure } => {
                    warn!(
                        %item_id,
                        stage = %failure.stage,
                        kind = %failure.kind,
                        reason = %failure.reason,
                        "Item failed"
                    );
                }
            }
            report.record(outcome);

            let done = report.recorded();
            if done % 10 == 0 || done == total {
                info!(done, total, "Run progress");
            }
        }
    }

    /// Drive one item to a terminal state and release its artifacts
    #[instrument(skip_all, fields(item_id = %item.item_id))]
    async fn process_item(
        &self,
        item: &Item,
        artifacts: &ArtifactStore,
        cancel: &CancellationToken,
    ) -> ItemOutcome {
        let mut machine = ItemMachine::new(&item.item_id);
        debug!(title = item.display_name(), source = %item.source_ref, "Processing item");

        if self.config.skip_existing {
            match self.store.find_existing(&item.source_ref).await {
                Ok(Some(record_id)) => {
                    info!(%record_id, "Already transcribed, skipping");
                    machine.apply(ItemEvent::AlreadyStored);
                    return machine.into_outcome(Some(record_id), true);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Lookup of existing transcript failed, processing anyway");
                }
            }
        }

        let workspace = match artifacts.reserve(&item.item_id).await {
            Ok(workspace) => workspace,
            Err(e) => {
                machine.apply(ItemEvent::Begin);
                machine.apply(ItemEvent::StageFailed {
                    kind: FailureKind::Resource,
                    reason: e.to_string(),
                });
                return machine.into_outcome(None, false);
            }
        };

        let record_id = self
            .drive_stages(item, &workspace, artifacts, &mut machine, cancel)
            .await;

        if let Err(e) = artifacts.release(&workspace).await {
            warn!(error = %e, "Failed to release item artifacts");
        }

        machine.into_outcome(record_id, false)
    }

    /// Download, transcribe and persist; `None` once any stage fails terminally
    async fn drive_stages(
        &self,
        item: &Item,
        workspace: &ItemWorkspace,
        artifacts: &ArtifactStore,
        machine: &mut ItemMachine,
        cancel: &CancellationToken,
    ) -> Option<RecordId> {
        let audio = self
            .run_stage(machine, self.config.download_budget(), cancel, move || async move {
                artifacts.clear_audio(workspace).await?;
                let audio = self.fetcher.fetch(item, &workspace.audio_dir).await?;
                debug!(path = %audio.file_path.display(), bytes = audio.byte_size, "Audio downloaded");
                Ok::<_, StageFailure>(audio)
            })
            .await?;

        let audio = &audio;
        let transcript = self
            .run_stage(machine, self.config.transcribe_budget(), cancel, move || async move {
                let output = self.transcriber.transcribe(audio).await?;
                let transcript = Transcript::new(item, output.segments, output.language)
                    .map_err(|e| StageFailure::permanent(FailureKind::ModelFailure, e.to_string()))?;
                artifacts.write_transcript(workspace, &transcript).await?;
                debug!(segments = transcript.segments.len(), "Transcript assembled");
                Ok::<_, StageFailure>(transcript)
            })
            .await?;

        let transcript = &transcript;
        self.run_stage(machine, self.config.persist_budget(), cancel, move || async move {
            Ok::<_, StageFailure>(self.store.save(transcript).await?)
        })
        .await
    }

    /// Run one stage with its retry budget.
    ///
    /// Enters the stage, then alternates attempt / backoff until the attempt
    /// succeeds, fails permanently, exhausts the budget, or the run is
    /// cancelled during a backoff.
    async fn run_stage<T, F, Fut>(
        &self,
        machine: &mut ItemMachine,
        budget: StageBudget,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StageFailure>>,
    {
        machine.apply(ItemEvent::Begin);
        let stage = machine.state().active_stage()?;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match attempt_fn().await {
                Ok(value) => {
                    machine.apply(ItemEvent::StageSucceeded);
                    return Some(value);
                }
                Err(failure) => {
                    machine.apply(ItemEvent::StageFailed {
                        kind: failure.kind,
                        reason: failure.reason.clone(),
                    });

                    if !failure.retryable || !budget.allows_another(attempt) {
                        error!(
                            %stage,
                            attempt,
                            kind = %failure.kind,
                            error = %failure.reason,
                            "Stage failed permanently"
                        );
                        return None;
                    }

                    let delay = budget.backoff_after(attempt);
                    warn!(
                        %stage,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.reason,
                        "Stage failed, retrying"
                    );

                    if cancel.is_cancelled() || !wait_or_cancel(delay, cancel).await {
                        info!(%stage, "Run cancelled, abandoning retry");
                        machine.abandon_retry();
                        return None;
                    }

                    machine.apply(ItemEvent::Retry);
                }
            }
        }
    }
}

/// Classified failure of a single stage attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub reason: String,
    pub retryable: bool,
}

impl StageFailure {
    pub fn permanent(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            retryable: false,
        }
    }
}

impl From<FetchError> for StageFailure {
    fn from(e: FetchError) -> Self {
        Self {
            kind: e.failure_kind(),
            retryable: e.is_retryable(),
            reason: e.message,
        }
    }
}

impl From<TranscribeError> for StageFailure {
    fn from(e: TranscribeError) -> Self {
        Self {
            kind: e.failure_kind(),
            retryable: e.is_retryable(),
            reason: e.message,
        }
    }
}

impl From<PersistError> for StageFailure {
    fn from(e: PersistError) -> Self {
        Self {
            kind: e.failure_kind(),
            retryable: e.is_retryable(),
            reason: e.message,
        }
    }
}

impl From<ResourceError> for StageFailure {
    fn from(e: ResourceError) -> Self {
        Self::permanent(FailureKind::Resource, e.to_string())
    }
}

/// Owns an item's state and applies events through [`transition`]
#[derive(Debug)]
struct ItemMachine {
    item_id: String,
    state: ItemState,
}

impl ItemMachine {
    fn new(item_id: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            state: ItemState::Pending,
        }
    }

    fn state(&self) -> &ItemState {
        &self.state
    }

    fn apply(&mut self, event: ItemEvent) {
        match transition(&self.state, &event) {
            Ok(next) => {
                debug!(item_id = %self.item_id, from = ?self.state, to = ?next, "Item transition");
                self.state = next;
            }
            Err(e) => {
                error!(item_id = %self.item_id, error = %e, "Rejected item transition");
                let stage = self.state.next_stage().unwrap_or(Stage::Dispatch);
                self.state = ItemState::Failed(ItemFailure::new(
                    stage,
                    FailureKind::Internal,
                    e.to_string(),
                ));
            }
        }
    }

    /// Mark the current failure as final because the run was cancelled
    fn abandon_retry(&mut self) {
        if let ItemState::Failed(failure) = &mut self.state {
            failure.reason.push_str(" (retry abandoned: run cancelled)");
        }
    }

    fn into_outcome(self, record_id: Option<RecordId>, skipped: bool) -> ItemOutcome {
        let item_id = self.item_id;

        match (self.state, record_id) {
            (ItemState::Completed, Some(record_id)) => ItemOutcome::Completed {
                item_id,
                record_id,
                skipped,
            },
            (ItemState::Failed(failure), _) => ItemOutcome::Failed { item_id, failure },
            (state, _) => {
                error!(%item_id, state = ?state, "Item did not reach a terminal state");
                let stage = state.next_stage().unwrap_or(Stage::Persist);
                ItemOutcome::Failed {
                    item_id,
                    failure: ItemFailure::new(
                        stage,
                        FailureKind::Internal,
                        format!("item left in state {:?}", state),
                    ),
                }
            }
        }
    }
}

fn cancelled_outcome(item: &Item) -> ItemOutcome {
    let mut machine = ItemMachine::new(&item.item_id);
    machine.apply(ItemEvent::Cancel);
    machine.into_outcome(None, false)
}

/// Sleep for `delay`; false if the run was cancelled first
async fn wait_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

fn validate_config(config: &ConfigSet) -> Result<(), PipelineError> {
    config
        .validate()
        .map_err(|problems| PipelineError::configuration(problems.join("; ")))
}

fn validate_request(request: &RunRequest) -> Result<(), PipelineError> {
    let url = request.source_url.trim();
    if url.is_empty() {
        return Err(PipelineError::configuration("url must not be empty"));
    }

    let parsed = Url::parse(url)
        .map_err(|e| PipelineError::configuration(format!("invalid url '{}': {}", url, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PipelineError::configuration(format!(
            "url must use http or https: {}",
            url
        )));
    }

    Ok(())
}

/// Item ids must be present and unique; they name the artifact paths
fn check_item_ids(items: &[Item]) -> Result<(), PipelineError> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();

    for item in items {
        if item.item_id.trim().is_empty() {
            return Err(PipelineError::configuration(format!(
                "item with empty id from {}",
                item.source_ref
            )));
        }
        if !seen.insert(item.item_id.as_str()) && !duplicates.contains(&item.item_id.as_str()) {
            duplicates.push(item.item_id.as_str());
        }
    }

    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::configuration(format!(
            "duplicate item ids: {}",
            duplicates.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(validate_request(&RunRequest::new("https://soundcloud.com/a/b", false)).is_ok());
        assert!(validate_request(&RunRequest::new("   ", false)).is_err());
        assert!(validate_request(&RunRequest::new("not a url", false)).is_err());
        assert!(validate_request(&RunRequest::new("ftp://example.com/a.mp3", false)).is_err());
    }

    #[test]
    fn test_invalid_config_creates_no_database() {
        let temp = tempfile::TempDir::new().unwrap();
        let db_path = temp.path().join("data").join("tracks.db");
        let config = ConfigSet {
            database_url: format!("sqlite://{}", db_path.display()),
            worker_count: 0,
            ..Default::default()
        };

        let err = match Orchestrator::with_default_adapters(config) {
            Ok(_) => panic!("worker_count 0 must be rejected"),
            Err(e) => e,
        };
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert_eq!(err.exit_code(), 2);
        assert!(!db_path.exists());
        assert!(!temp.path().join("data").exists());
    }

    #[test]
    fn test_request_from_config() {
        let config = ConfigSet {
            url: Some("https://soundcloud.com/a/sets/b".to_string()),
            is_playlist: true,
            ..Default::default()
        };
        let request = RunRequest::from_config(&config).unwrap();
        assert!(request.is_playlist);

        assert!(RunRequest::from_config(&ConfigSet::default()).is_err());
    }

    #[test]
    fn test_duplicate_ids_detected() {
        let items = vec![
            Item::new("a", "https://x/a"),
            Item::new("b", "https://x/b"),
            Item::new("a", "https://x/a2"),
        ];
        let err = check_item_ids(&items).unwrap_err();
        assert!(err.to_string().contains("duplicate item ids: a"));

        assert!(check_item_ids(&items[..2]).is_ok());
        assert!(check_item_ids(&[Item::new(" ", "https://x")]).is_err());
    }

    #[test]
    fn test_machine_outcomes() {
        let mut machine = ItemMachine::new("a");
        machine.apply(ItemEvent::AlreadyStored);
        assert!(matches!(
            machine.into_outcome(Some(RecordId(3)), true),
            ItemOutcome::Completed { skipped: true, .. }
        ));

        // Non-terminal machine is reported as an internal failure
        let mut machine = ItemMachine::new("b");
        machine.apply(ItemEvent::Begin);
        match machine.into_outcome(None, false) {
            ItemOutcome::Failed { failure, .. } => {
                assert_eq!(failure.kind, FailureKind::Internal);
                assert_eq!(failure.stage, Stage::Download);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_event_becomes_internal_failure() {
        let mut machine = ItemMachine::new("c");
        machine.apply(ItemEvent::StageSucceeded);
        match machine.state() {
            ItemState::Failed(failure) => assert_eq!(failure.kind, FailureKind::Internal),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_abandon_retry_annotates_reason() {
        let mut machine = ItemMachine::new("d");
        machine.apply(ItemEvent::Begin);
        machine.apply(ItemEvent::StageFailed {
            kind: FailureKind::Transient,
            reason: "timeout".to_string(),
        });
        machine.abandon_retry();
        match machine.into_outcome(None, false) {
            ItemOutcome::Failed { failure, .. } => {
                assert_eq!(failure.kind, FailureKind::Transient);
                assert!(failure.reason.contains("retry abandoned"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
