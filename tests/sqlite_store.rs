//! SQLite Store Integration Tests
//!
//! Runs the orchestrator against a real SQLite database with stub
//! download and transcription.

mod common;

use std::sync::Arc;

use common::{items, test_config, StubFetcher, StubTranscriber, PLAYLIST_URL};
use tempfile::TempDir;
use trackscribe::adapters::sqlite::{DatabaseLocation, STATUS_TRANSCRIBED};
use trackscribe::adapters::{SqliteStore, TranscriptStore};
use trackscribe::config::ConfigSet;
use trackscribe::core::{Orchestrator, RunRequest};
use trackscribe::domain::{Item, Transcript, TranscriptSegment};

fn orchestrator(config: ConfigSet, ids: &[&str], store: Arc<SqliteStore>) -> Orchestrator {
    Orchestrator::new(
        config,
        Arc::new(StubFetcher::new(items(ids))),
        Arc::new(StubTranscriber::default()),
        store,
    )
    .unwrap()
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let url = format!("sqlite://{}", temp.path().join("db").join("t.db").display());

    let item = Item::new("t1", "https://soundcloud.com/artist/t1");
    let transcript =
        Transcript::new(&item, vec![TranscriptSegment::new(0, 500, "hi")], None).unwrap();

    let id = {
        let store = SqliteStore::open(&url).unwrap();
        store.save(&transcript).await.unwrap()
    };

    let store = SqliteStore::open(&url).unwrap();
    assert_eq!(store.find_existing(&item.source_ref).await.unwrap(), Some(id));
    assert_eq!(store.load_transcript(id).await.unwrap().unwrap(), transcript);
}

#[tokio::test]
async fn test_run_marks_tracks_transcribed() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let report = orchestrator(test_config(&temp), &["a", "b"], store.clone())
        .run(RunRequest::new(PLAYLIST_URL, true))
        .await
        .unwrap();

    assert_eq!(report.succeeded.len(), 2);
    for id in ["a", "b"] {
        let source = format!("https://soundcloud.com/artist/{}", id);
        assert_eq!(
            store.track_status(&source).await.unwrap().as_deref(),
            Some(STATUS_TRANSCRIBED)
        );
        let record = report.records[id];
        let stored = store.load_transcript(record).await.unwrap().unwrap();
        assert_eq!(stored.full_text(), format!("hello {}", id));
    }
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let first_temp = TempDir::new().unwrap();
    let mut config = test_config(&first_temp);
    config.skip_existing = false;
    let first = orchestrator(config, &["a"], store.clone())
        .run(RunRequest::new(PLAYLIST_URL, true))
        .await
        .unwrap();

    let second_temp = TempDir::new().unwrap();
    let mut config = test_config(&second_temp);
    config.skip_existing = false;
    let second = orchestrator(config, &["a"], store.clone())
        .run(RunRequest::new(PLAYLIST_URL, true))
        .await
        .unwrap();

    let first_record = first.records["a"];
    let second_record = second.records["a"];

    // The earlier transcript is replaced, not duplicated
    assert!(store.load_transcript(first_record).await.unwrap().is_none());
    let stored = store.load_transcript(second_record).await.unwrap().unwrap();
    assert_eq!(stored.segments, vec![TranscriptSegment::new(0, 1000, "hello a")]);
}

#[tokio::test]
async fn test_rerun_skips_stored_tracks() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let temp = TempDir::new().unwrap();
    let first = orchestrator(test_config(&temp), &["a"], store.clone())
        .run(RunRequest::new(PLAYLIST_URL, true))
        .await
        .unwrap();

    let temp = TempDir::new().unwrap();
    let second = orchestrator(test_config(&temp), &["a", "b"], store.clone())
        .run(RunRequest::new(PLAYLIST_URL, true))
        .await
        .unwrap();

    assert!(second.skipped.contains("a"));
    assert!(!second.skipped.contains("b"));
    assert_eq!(second.records["a"], first.records["a"]);
}

#[test]
fn test_non_sqlite_scheme_rejected() {
    assert!(DatabaseLocation::parse("postgresql://user@localhost/tracks").is_err());
    assert!(SqliteStore::open("mysql://localhost/tracks").is_err());
}
