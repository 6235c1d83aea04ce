//! End-to-end pipeline tests with in-process doubles for the reasoning
//! service and the remote repository.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use brainbox::config::{ChannelConfig, EnrichmentConfig};
use brainbox::enrich::{Enricher, RawSuggestion};
use brainbox::error::PipelineError;
use brainbox::models::{ContentType, InboundItem, PublishStatus, Recommendation};
use brainbox::pipeline::Pipeline;
use brainbox::publish::Publisher;
use brainbox::repo::RepoClient;
use brainbox::storage::RawStore;
use brainbox::store::MetadataStore;
use brainbox::{db, migrate, reconcile};

struct FakeEnricher {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeEnricher {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail,
        })
    }
}

#[async_trait]
impl Enricher for FakeEnricher {
    fn name(&self) -> &str {
        "fake"
    }

    async fn analyze(&self, _text: &str, _content_type: ContentType) -> Result<RawSuggestion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("provider down");
        }
        Ok(RawSuggestion {
            tags: vec!["Rust".to_string(), "memory".to_string()],
            summary: "Notes about ownership.".to_string(),
            topic: "rust".to_string(),
            markdown: "# Ownership\n\nNotes about ownership.\n".to_string(),
            suggested_subfolder: "rust".to_string(),
            suggested_filename: "ownership-notes.md".to_string(),
            commit_message: "Add ownership notes".to_string(),
        })
    }
}

struct FakeRepo {
    fail: bool,
}

#[async_trait]
impl RepoClient for FakeRepo {
    async fn ensure_folder(&self, _path: &str) -> Result<()> {
        if self.fail {
            bail!("remote unreachable");
        }
        Ok(())
    }

    async fn write_file(&self, _path: &str, _bytes: &[u8], _message: &str) -> Result<String> {
        if self.fail {
            bail!("remote unreachable");
        }
        Ok("commit-sha".to_string())
    }

    async fn push(&self) -> Result<()> {
        if self.fail {
            bail!("remote unreachable");
        }
        Ok(())
    }
}

struct Env {
    _tmp: TempDir,
    store: MetadataStore,
    raw_root: std::path::PathBuf,
}

const SENDER: i64 = 42;

async fn setup() -> Env {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("brainbox.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    Env {
        raw_root: tmp.path().join("storage"),
        _tmp: tmp,
        store: MetadataStore::new(pool),
    }
}

fn make_pipeline(env: &Env, enricher: Arc<FakeEnricher>, repo_fails: bool) -> Pipeline {
    let raw = RawStore::new(env.raw_root.clone());
    raw.init().unwrap();
    let repo: Arc<dyn RepoClient> = Arc::new(FakeRepo { fail: repo_fails });
    // Single attempt per step keeps failing-repo tests fast.
    let publisher = Publisher::new(env.store.clone(), repo, 1);
    Pipeline::new(
        &ChannelConfig {
            allowed_sender_id: SENDER,
            publish_marker: "#github".to_string(),
        },
        EnrichmentConfig::default(),
        raw,
        env.store.clone(),
        enricher,
        publisher,
    )
}

fn note(text: &str) -> InboundItem {
    InboundItem {
        sender_id: SENDER,
        message_id: 100,
        payload: None,
        original_name: None,
        mime_hint: None,
        text: Some(text.to_string()),
    }
}

#[tokio::test]
async fn note_without_trigger_is_stored_only() {
    let env = setup().await;
    let pipeline = make_pipeline(&env, FakeEnricher::new(false), false);

    let outcome = pipeline.process(note("remember to buy milk")).await.unwrap();

    assert_eq!(outcome.recommendation, Recommendation::StoreOnly);
    assert!(outcome.publish.is_none());
    assert!(outcome.response.contains("Saved note"));
    assert!(!outcome.response.contains("Published"));

    let item = env.store.get_item(&outcome.item_id).await.unwrap().unwrap();
    assert_eq!(item.content_type, ContentType::Note);
    assert_eq!(item.topic.as_deref(), Some("rust"));
    assert_eq!(item.tags, vec!["rust", "memory"]);

    // Raw bytes are on disk under the type folder and round-trip intact.
    assert!(item.raw_file_path.starts_with("notes/uncategorized/"));
    let raw = RawStore::new(env.raw_root.clone());
    assert_eq!(raw.read(&item.raw_file_path).unwrap(), b"remember to buy milk");

    let decisions = env.store.decisions_for_item(&item.id).await.unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].seq, 1);
    assert_eq!(decisions[0].recommendation, Recommendation::StoreOnly);
}

#[tokio::test]
async fn marker_triggers_publish() {
    let env = setup().await;
    let pipeline = make_pipeline(&env, FakeEnricher::new(false), false);

    let outcome = pipeline
        .process(note("worth keeping https://example.invalid/post #github"))
        .await
        .unwrap();

    assert_eq!(outcome.recommendation, Recommendation::Publish);
    let record = outcome.publish.expect("publish record");
    assert_eq!(record.status, PublishStatus::Succeeded);
    assert_eq!(record.target_path, "links/rust/ownership-notes.md");
    assert_eq!(record.commit_reference.as_deref(), Some("commit-sha"));
    assert!(outcome.response.contains("Published to links/rust/ownership-notes.md"));

    let item = env.store.get_item(&outcome.item_id).await.unwrap().unwrap();
    assert_eq!(item.content_type, ContentType::Link);

    // Exactly one decision gates the publish; nothing extra is derived or
    // recorded on the way to the repository.
    let decisions = env.store.decisions_for_item(&item.id).await.unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].recommendation, Recommendation::Publish);
}

#[tokio::test]
async fn degraded_enrichment_still_stores_and_publishes() {
    let env = setup().await;
    let pipeline = make_pipeline(&env, FakeEnricher::new(true), false);

    let outcome = pipeline.process(note("keep this #github")).await.unwrap();

    assert_eq!(outcome.recommendation, Recommendation::Publish);
    let record = outcome.publish.expect("publish record");
    assert_eq!(record.status, PublishStatus::Succeeded);
    // Fallback path: fixed folder, "general" subfolder, name-derived file.
    // The default note name is `note_100.txt`, slugged to `note100-txt.md`.
    assert_eq!(record.target_path, "notes/general/note100-txt.md");
    assert!(outcome.response.contains("reduced metadata"));

    let item = env.store.get_item(&outcome.item_id).await.unwrap().unwrap();
    assert_eq!(item.topic.as_deref(), Some("general"));
    assert_eq!(item.tags, vec!["note"]);
}

#[tokio::test]
async fn unauthorized_sender_leaves_no_trace() {
    let env = setup().await;
    let enricher = FakeEnricher::new(false);
    let pipeline = make_pipeline(&env, enricher.clone(), false);

    let mut item = note("sneaky #github");
    item.sender_id = 999;
    let err = pipeline.process(item).await.unwrap_err();
    assert!(matches!(err, PipelineError::UnauthorizedSender(999)));

    // No metadata rows, no enrichment call, no stored files.
    let items = env.store.list_by_type(ContentType::Note, 10).await.unwrap();
    assert!(items.is_empty());
    assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);
    let stored: Vec<_> = walk_files(&env.raw_root);
    assert!(stored.is_empty(), "unexpected files: {:?}", stored);
}

#[tokio::test]
async fn storage_failure_aborts_before_enrichment() {
    let env = setup().await;
    let enricher = FakeEnricher::new(false);
    let pipeline = make_pipeline(&env, enricher.clone(), false);

    // Replace the notes folder with a regular file so the raw write fails.
    let notes = env.raw_root.join("notes");
    std::fs::remove_dir_all(&notes).unwrap();
    std::fs::write(&notes, b"not a directory").unwrap();

    let err = pipeline.process(note("this cannot land")).await.unwrap_err();
    assert!(matches!(err, PipelineError::StorageWrite(_)));

    let items = env.store.list_by_type(ContentType::Note, 10).await.unwrap();
    assert!(items.is_empty());
    assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reconcile_resumes_item_stored_without_decision() {
    let env = setup().await;
    let pipeline = make_pipeline(&env, FakeEnricher::new(false), false);

    // Simulate a crash after the raw write and item insert: raw file and
    // row exist, but no decision.
    let raw = RawStore::new(env.raw_root.clone());
    raw.init().unwrap();
    let rel = raw
        .write(ContentType::Note, None, 7, "crashed.txt", b"half-finished note")
        .unwrap();
    let item = brainbox::models::ContentItem {
        id: "interrupted-1".to_string(),
        content_type: ContentType::Note,
        raw_file_path: rel,
        original_name: "crashed.txt".to_string(),
        source_message_id: 7,
        source_user_id: SENDER,
        extracted_text: None,
        tags: vec![],
        summary: None,
        topic: None,
        content_hash: "h".to_string(),
        created_at: chrono::Utc::now(),
    };
    env.store.insert_item(&item).await.unwrap();

    let report = reconcile::run(&pipeline, &env.store).await.unwrap();
    assert_eq!(report.resumed, 1);

    let decisions = env.store.decisions_for_item("interrupted-1").await.unwrap();
    assert_eq!(decisions.len(), 1);
    let updated = env.store.get_item("interrupted-1").await.unwrap().unwrap();
    assert_eq!(updated.topic.as_deref(), Some("rust"));

    // A second pass finds nothing to do.
    let report = reconcile::run(&pipeline, &env.store).await.unwrap();
    assert_eq!(report.resumed, 0);
    assert_eq!(report.retried, 0);
}

#[tokio::test]
async fn failed_publish_is_retried_but_never_repeated_after_success() {
    let env = setup().await;
    let broken = make_pipeline(&env, FakeEnricher::new(false), true);

    let outcome = broken.process(note("ship it #github")).await.unwrap();
    assert_eq!(outcome.recommendation, Recommendation::Publish);
    let record = outcome.publish.expect("publish record");
    assert_eq!(record.status, PublishStatus::Failed);
    assert!(outcome.response.contains("will be retried"));

    // The failure left a retry candidate behind.
    let candidates = env.store.publish_retry_candidates().await.unwrap();
    assert_eq!(candidates.len(), 1);

    // Reconcile with a healthy remote publishes it.
    let healthy = make_pipeline(&env, FakeEnricher::new(false), false);
    let report = reconcile::run(&healthy, &env.store).await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.published, 1);

    let succeeded = env
        .store
        .succeeded_publish(&outcome.item_id)
        .await
        .unwrap()
        .expect("succeeded record");
    assert_eq!(succeeded.status, PublishStatus::Succeeded);

    // Decision history is append-only: ingest run plus retry run.
    let decisions = env.store.decisions_for_item(&outcome.item_id).await.unwrap();
    assert_eq!(decisions.len(), 2);
    assert_eq!(decisions[1].seq, 2);

    // Once succeeded, nothing is pending and replay does not re-send.
    let report = reconcile::run(&healthy, &env.store).await.unwrap();
    assert_eq!(report.retried, 0);
    assert!(env.store.publish_retry_candidates().await.unwrap().is_empty());
}

#[tokio::test]
async fn publish_existing_short_circuits_when_already_published() {
    let env = setup().await;
    let pipeline = make_pipeline(&env, FakeEnricher::new(false), false);

    let outcome = pipeline.process(note("publish me #github")).await.unwrap();
    let first = outcome.publish.expect("publish record");
    assert_eq!(first.status, PublishStatus::Succeeded);

    let item = env.store.get_item(&outcome.item_id).await.unwrap().unwrap();
    let replay = pipeline
        .publish_existing(item, brainbox::decision::command_trigger("publish last"))
        .await
        .unwrap();
    let second = replay.publish.expect("publish record");
    assert_eq!(second.id, first.id, "replay must return the original record");
}

fn walk_files(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                found.push(path);
            }
        }
    }
    found
}
