//! Shared test doubles for integration tests.
//!
//! Each stub replays scripted failures per item id, then succeeds, and
//! counts every call so tests can assert on attempt budgets.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use trackscribe::adapters::{
    FetchError, Fetcher, PersistError, TranscribeError, Transcriber, TranscriptStore,
    TranscriptionOutput,
};
use trackscribe::config::ConfigSet;
use trackscribe::core::Orchestrator;
use trackscribe::domain::{AudioArtifact, Item, RecordId, Transcript, TranscriptSegment};

pub const PLAYLIST_URL: &str = "https://soundcloud.com/artist/sets/mixes";

/// Items `a`, `b`, `c`, ... with URLs under the test playlist
pub fn items(ids: &[&str]) -> Vec<Item> {
    ids.iter()
        .map(|id| Item::new(*id, format!("https://soundcloud.com/artist/{}", id)))
        .collect()
}

/// Config rooted in a temp dir with zero retry delays
pub fn test_config(temp: &TempDir) -> ConfigSet {
    ConfigSet {
        url: Some(PLAYLIST_URL.to_string()),
        is_playlist: true,
        database_url: "sqlite::memory:".to_string(),
        tmp_dir: temp.path().join("tmp"),
        max_retries: 2,
        persist_max_attempts: 3,
        retry_delay_ms: 0,
        persist_retry_delay_ms: 0,
        worker_count: 1,
        min_free_bytes: 0,
        ..Default::default()
    }
}

/// True when no run left anything under the artifact roots
pub fn artifact_roots_empty(config: &ConfigSet) -> bool {
    [config.audio_dir(), config.transcript_dir()]
        .iter()
        .all(|dir| match std::fs::read_dir(dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        })
}

/// Per-item queue of scripted results
pub struct Script<E> {
    queued: Mutex<HashMap<String, VecDeque<E>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl<E> Default for Script<E> {
    fn default() -> Self {
        Self {
            queued: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<E> Script<E> {
    pub fn push(&self, item_id: &str, value: E) {
        self.queued
            .lock()
            .unwrap()
            .entry(item_id.to_string())
            .or_default()
            .push_back(value);
    }

    pub fn push_n(&self, item_id: &str, count: usize, make: impl Fn() -> E) {
        for _ in 0..count {
            self.push(item_id, make());
        }
    }

    /// Count the call and take the next scripted value, if any
    fn next(&self, item_id: &str) -> Option<E> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(item_id.to_string())
            .or_default() += 1;
        self.queued
            .lock()
            .unwrap()
            .get_mut(item_id)
            .and_then(|queue| queue.pop_front())
    }

    pub fn calls(&self, item_id: &str) -> usize {
        self.calls.lock().unwrap().get(item_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

/// Fetcher that writes a fake audio file
#[derive(Default)]
pub struct StubFetcher {
    pub items: Vec<Item>,
    pub enumerate_errors: Mutex<VecDeque<FetchError>>,
    pub enumerate_calls: AtomicUsize,
    pub fetch: Script<FetchError>,

    /// Cancelled when the first fetch starts
    pub cancel_on_fetch: Option<CancellationToken>,

    /// Simulated download time
    pub delay: Duration,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl StubFetcher {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    fn name(&self) -> &str {
        "stub"
    }

    async fn enumerate(&self, _source_url: &str, _is_playlist: bool) -> Result<Vec<Item>, FetchError> {
        self.enumerate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.enumerate_errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        Ok(self.items.clone())
    }

    async fn fetch(&self, item: &Item, dest_dir: &Path) -> Result<AudioArtifact, FetchError> {
        if let Some(token) = &self.cancel_on_fetch {
            token.cancel();
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        // Leftovers from an earlier attempt must have been cleared
        let mut entries = tokio::fs::read_dir(dest_dir).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());

        tokio::fs::write(dest_dir.join("audio.part"), b"partial").await.unwrap();
        if let Some(e) = self.fetch.next(&item.item_id) {
            return Err(e);
        }

        let file_path = dest_dir.join("audio.wav");
        tokio::fs::write(&file_path, b"RIFF....WAVE").await.unwrap();

        Ok(AudioArtifact {
            item_id: item.item_id.clone(),
            file_path,
            byte_size: 12,
        })
    }
}

/// Transcriber returning one segment per item unless scripted otherwise
#[derive(Default)]
pub struct StubTranscriber {
    pub script: Script<Result<TranscriptionOutput, TranscribeError>>,
}

impl StubTranscriber {
    pub fn fail(&self, item_id: &str, error: TranscribeError) {
        self.script.push(item_id, Err(error));
    }

    pub fn respond(&self, item_id: &str, segments: Vec<TranscriptSegment>) {
        self.script.push(
            item_id,
            Ok(TranscriptionOutput {
                segments,
                language: Some("en".to_string()),
            }),
        );
    }
}

#[async_trait]
impl Transcriber for StubTranscriber {
    fn name(&self) -> &str {
        "stub"
    }

    async fn transcribe(&self, audio: &AudioArtifact) -> Result<TranscriptionOutput, TranscribeError> {
        assert!(audio.file_path.exists(), "audio must exist while transcribing");

        match self.script.next(&audio.item_id) {
            Some(result) => result,
            None => Ok(TranscriptionOutput {
                segments: vec![TranscriptSegment::new(0, 1000, format!("hello {}", audio.item_id))],
                language: Some("en".to_string()),
            }),
        }
    }
}

/// In-memory transcript store
#[derive(Default)]
pub struct StubStore {
    pub save: Script<PersistError>,
    saved: Mutex<HashMap<String, (RecordId, Transcript)>>,
    next_id: AtomicI64,
    pub find_calls: AtomicUsize,
}

impl StubStore {
    /// Pretend a transcript for `source_ref` is already stored
    pub fn seed(&self, item: &Item) -> RecordId {
        let transcript = Transcript::new(item, Vec::new(), None).unwrap();
        let id = RecordId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.saved
            .lock()
            .unwrap()
            .insert(item.source_ref.clone(), (id, transcript));
        id
    }

    pub fn stored(&self, source_ref: &str) -> Option<Transcript> {
        self.saved
            .lock()
            .unwrap()
            .get(source_ref)
            .map(|(_, t)| t.clone())
    }

    pub fn len(&self) -> usize {
        self.saved.lock().unwrap().len()
    }
}

#[async_trait]
impl TranscriptStore for StubStore {
    fn name(&self) -> &str {
        "stub"
    }

    async fn save(&self, transcript: &Transcript) -> Result<RecordId, PersistError> {
        if let Some(e) = self.save.next(&transcript.item_id) {
            return Err(e);
        }

        let id = RecordId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.saved
            .lock()
            .unwrap()
            .insert(transcript.source_ref.clone(), (id, transcript.clone()));
        Ok(id)
    }

    async fn find_existing(&self, source_ref: &str) -> Result<Option<RecordId>, PersistError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.saved.lock().unwrap().get(source_ref).map(|(id, _)| *id))
    }
}

/// Stubs plus an orchestrator wired to them
pub struct Harness {
    pub temp: TempDir,
    pub config: ConfigSet,
    pub fetcher: Arc<StubFetcher>,
    pub transcriber: Arc<StubTranscriber>,
    pub store: Arc<StubStore>,
}

impl Harness {
    pub fn new(ids: &[&str]) -> Self {
        Self::with_fetcher(StubFetcher::new(items(ids)))
    }

    pub fn with_fetcher(fetcher: StubFetcher) -> Self {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        Self {
            temp,
            config,
            fetcher: Arc::new(fetcher),
            transcriber: Arc::new(StubTranscriber::default()),
            store: Arc::new(StubStore::default()),
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.config.clone(),
            self.fetcher.clone(),
            self.transcriber.clone(),
            self.store.clone(),
        )
        .unwrap()
    }
}
