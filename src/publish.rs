//! Publish orchestrator.
//!
//! Executes the remote-repository side effects for one item, strictly gated
//! by a publish decision. The orchestration is effectively-once: a prior
//! succeeded record short-circuits the attempt, and the schema enforces at
//! most one succeeded record per item. Each step (ensure folders, write
//! file, push) is retried with bounded exponential backoff (3 attempts,
//! 500 ms base, doubling); a step that stays failed records a `failed`
//! attempt with the furthest completed step and leaves the item eligible
//! for out-of-band retry. Local storage is never rolled back.

use anyhow::{bail, Result};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    ContentItem, Decision, EnrichmentResult, PublishRecord, PublishStatus, Recommendation,
};
use crate::repo::RepoClient;
use crate::store::MetadataStore;

const BACKOFF_BASE: Duration = Duration::from_millis(500);

const STEP_NONE: &str = "none";
const STEP_ENSURE_FOLDER: &str = "ensure_folder";
const STEP_WRITE_FILE: &str = "write_file";
const STEP_PUSH: &str = "push";

pub struct Publisher {
    store: MetadataStore,
    repo: Arc<dyn RepoClient>,
    max_retries: u32,
}

impl Publisher {
    pub fn new(store: MetadataStore, repo: Arc<dyn RepoClient>, max_retries: u32) -> Self {
        Self {
            store,
            repo,
            max_retries: max_retries.max(1),
        }
    }

    /// Publish one item. Returns the resulting record; a failed attempt is
    /// a normal return, not an error — the pipeline reports it as degraded
    /// success and the item stays retryable.
    pub async fn publish(
        &self,
        item: &ContentItem,
        decision: &Decision,
        enrichment: &EnrichmentResult,
    ) -> Result<PublishRecord> {
        if decision.recommendation != Recommendation::Publish {
            bail!("publish invoked without a publish recommendation");
        }

        // Effective-once: never re-publish after a prior success.
        if let Some(existing) = self.store.succeeded_publish(&item.id).await? {
            info!(item_id = %item.id, "publish already succeeded, short-circuiting");
            return Ok(existing);
        }

        let target_path = target_path(item, enrichment);
        let commit_message = commit_message(item, enrichment);
        let content = enrichment.markdown.as_bytes().to_vec();

        let mut last_step = STEP_NONE;
        let mut commit_reference = None;
        let mut failure = None;

        // Top-level folder first, then the suggested subfolder beneath it.
        let folder = target_path
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();

        match self
            .retry_step(STEP_ENSURE_FOLDER, || self.repo.ensure_folder(&folder))
            .await
        {
            Ok(()) => last_step = STEP_ENSURE_FOLDER,
            Err(e) => failure = Some(e),
        }

        if failure.is_none() {
            match self
                .retry_step(STEP_WRITE_FILE, || {
                    self.repo.write_file(&target_path, &content, &commit_message)
                })
                .await
            {
                Ok(reference) => {
                    last_step = STEP_WRITE_FILE;
                    commit_reference = Some(reference);
                }
                Err(e) => failure = Some(e),
            }
        }

        if failure.is_none() {
            match self.retry_step(STEP_PUSH, || self.repo.push()).await {
                Ok(()) => last_step = STEP_PUSH,
                Err(e) => failure = Some(e),
            }
        }

        let status = if failure.is_none() {
            PublishStatus::Succeeded
        } else {
            PublishStatus::Failed
        };

        let record = PublishRecord {
            id: Uuid::new_v4().to_string(),
            content_item_id: item.id.clone(),
            target_path,
            commit_message,
            commit_reference,
            status,
            last_step: Some(last_step.to_string()),
            attempted_at: Utc::now(),
        };
        self.store.insert_publish_record(&record).await?;

        match &failure {
            None => info!(
                item_id = %item.id,
                path = %record.target_path,
                "published to remote repository"
            ),
            Some(e) => warn!(
                item_id = %item.id,
                last_step,
                error = %e,
                "publish attempt failed, recorded for retry"
            ),
        }

        Ok(record)
    }

    async fn retry_step<T, F, Fut>(&self, step: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
            }
            match call().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    warn!(step, attempt = attempt + 1, error = %e, "publish step failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("publish step {} failed", step)))
    }
}

/// Destination path inside the repository. The top-level folder is fixed by
/// content type; the AI suggestion contributes only the subfolder and the
/// filename, and only when valid. Invalid suggestions (empty, absolute, or
/// escaping the root) fall back to deterministic defaults.
pub fn target_path(item: &ContentItem, enrichment: &EnrichmentResult) -> String {
    let top = item.content_type.repo_folder();

    let subfolder = valid_segment(&enrichment.suggested_subfolder)
        .or_else(|| item.topic.as_deref().and_then(valid_segment))
        .unwrap_or_else(|| "general".to_string());

    let filename = valid_filename(&enrichment.suggested_filename)
        .unwrap_or_else(|| format!("{}.md", item.id));

    format!("{}/{}/{}", top, subfolder, filename)
}

/// Deterministic commit message derived from the item when the suggestion
/// is unusable.
pub fn commit_message(item: &ContentItem, enrichment: &EnrichmentResult) -> String {
    let suggestion = enrichment.suggested_commit_message.trim();
    if suggestion.is_empty() || suggestion.len() > 200 {
        format!("Add {} {}", item.content_type, item.id)
    } else {
        suggestion.to_string()
    }
}

fn valid_segment(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty()
        || s.starts_with('/')
        || s.contains("..")
        || s.contains('\\')
        || s.contains('/')
    {
        return None;
    }
    Some(s.to_string())
}

fn valid_filename(s: &str) -> Option<String> {
    let candidate = valid_segment(s)?;
    if candidate.ends_with(".md") && candidate.trim_end_matches(".md").is_empty() {
        return None;
    }
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;
    use crate::{db, decision, enrich, migrate};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory repo double recording calls; optionally fails one step.
    pub struct MockRepo {
        pub calls: Mutex<Vec<String>>,
        pub fail_step: Option<&'static str>,
    }

    impl MockRepo {
        fn new(fail_step: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_step,
            })
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait::async_trait]
    impl RepoClient for MockRepo {
        async fn ensure_folder(&self, path: &str) -> Result<()> {
            self.record(format!("ensure_folder:{}", path));
            if self.fail_step == Some(STEP_ENSURE_FOLDER) {
                bail!("folder refused");
            }
            Ok(())
        }

        async fn write_file(&self, path: &str, _bytes: &[u8], message: &str) -> Result<String> {
            self.record(format!("write_file:{}:{}", path, message));
            if self.fail_step == Some(STEP_WRITE_FILE) {
                bail!("write refused");
            }
            Ok("commit-sha-1".to_string())
        }

        async fn push(&self) -> Result<()> {
            self.record("push".to_string());
            if self.fail_step == Some(STEP_PUSH) {
                bail!("push refused");
            }
            Ok(())
        }
    }

    async fn setup() -> (TempDir, MetadataStore, ContentItem) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("meta.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let store = MetadataStore::new(pool);

        let item = ContentItem {
            id: "item-pub-1".to_string(),
            content_type: ContentType::Note,
            raw_file_path: "notes/uncategorized/x.txt".to_string(),
            original_name: "x.txt".to_string(),
            source_message_id: 5,
            source_user_id: 42,
            extracted_text: Some("hello".to_string()),
            tags: vec!["note".to_string()],
            summary: Some("s".to_string()),
            topic: Some("general".to_string()),
            content_hash: "h".to_string(),
            created_at: Utc::now(),
        };
        store.insert_item(&item).await.unwrap();
        (tmp, store, item)
    }

    fn publish_decision(item: &ContentItem, e: &EnrichmentResult) -> Decision {
        let trigger = decision::detect_trigger(Some("#github"), "#github").unwrap();
        decision::decide(item, e, Some(&trigger), 1)
    }

    #[tokio::test]
    async fn successful_publish_records_commit() {
        let (_tmp, store, item) = setup().await;
        let repo = MockRepo::new(None);
        let publisher = Publisher::new(store.clone(), repo.clone(), 1);
        let e = enrich::fallback_result(ContentType::Note, "x.txt");
        let d = publish_decision(&item, &e);

        let record = publisher.publish(&item, &d, &e).await.unwrap();
        assert_eq!(record.status, PublishStatus::Succeeded);
        assert_eq!(record.commit_reference.as_deref(), Some("commit-sha-1"));
        assert_eq!(record.last_step.as_deref(), Some("push"));
        assert!(record.target_path.starts_with("notes/general/"));

        let calls = repo.calls.lock().unwrap();
        assert!(calls[0].starts_with("ensure_folder:notes/general"));
        assert!(calls.iter().any(|c| c == "push"));
    }

    #[tokio::test]
    async fn replay_after_success_is_a_no_op() {
        let (_tmp, store, item) = setup().await;
        let repo = MockRepo::new(None);
        let publisher = Publisher::new(store.clone(), repo.clone(), 1);
        let e = enrich::fallback_result(ContentType::Note, "x.txt");
        let d = publish_decision(&item, &e);

        let first = publisher.publish(&item, &d, &e).await.unwrap();
        let calls_after_first = repo.calls.lock().unwrap().len();

        let second = publisher.publish(&item, &d, &e).await.unwrap();
        assert_eq!(second.id, first.id);
        // No new remote side effects.
        assert_eq!(repo.calls.lock().unwrap().len(), calls_after_first);
    }

    #[tokio::test]
    async fn push_failure_records_failed_with_furthest_step() {
        let (_tmp, store, item) = setup().await;
        let repo = MockRepo::new(Some(STEP_PUSH));
        let publisher = Publisher::new(store.clone(), repo, 2);
        let e = enrich::fallback_result(ContentType::Note, "x.txt");
        let d = publish_decision(&item, &e);

        let record = publisher.publish(&item, &d, &e).await.unwrap();
        assert_eq!(record.status, PublishStatus::Failed);
        assert_eq!(record.last_step.as_deref(), Some("write_file"));
        // Failed attempts never claim the effective-once slot.
        assert!(store.succeeded_publish(&item.id).await.unwrap().is_none());
        // And the item shows up for out-of-band retry.
        let retry = store.publish_retry_candidates().await.unwrap();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].id, item.id);
    }

    #[tokio::test]
    async fn store_only_decision_is_rejected() {
        let (_tmp, store, item) = setup().await;
        let publisher = Publisher::new(store, MockRepo::new(None), 1);
        let e = enrich::fallback_result(ContentType::Note, "x.txt");
        let d = decision::decide(&item, &e, None, 1);
        assert!(publisher.publish(&item, &d, &e).await.is_err());
    }

    #[test]
    fn invalid_suggestions_fall_back_deterministically() {
        let e = EnrichmentResult {
            suggested_subfolder: "/abs/../escape".to_string(),
            suggested_filename: "../../evil.md".to_string(),
            ..Default::default()
        };
        let item = ContentItem {
            id: "fixed-id".to_string(),
            content_type: ContentType::Link,
            raw_file_path: String::new(),
            original_name: "n".to_string(),
            source_message_id: 1,
            source_user_id: 1,
            extracted_text: None,
            tags: vec![],
            summary: None,
            topic: None,
            content_hash: "h".to_string(),
            created_at: Utc::now(),
        };
        assert_eq!(target_path(&item, &e), "links/general/fixed-id.md");
        assert_eq!(commit_message(&item, &e), "Add link fixed-id");
    }

    #[test]
    fn valid_suggestions_are_used_beneath_fixed_folder() {
        let e = EnrichmentResult {
            suggested_subfolder: "rust".to_string(),
            suggested_filename: "ownership-notes.md".to_string(),
            suggested_commit_message: "Add notes on ownership".to_string(),
            ..Default::default()
        };
        let item = ContentItem {
            id: "i".to_string(),
            content_type: ContentType::Image,
            raw_file_path: String::new(),
            original_name: "p.png".to_string(),
            source_message_id: 1,
            source_user_id: 1,
            extracted_text: None,
            tags: vec![],
            summary: None,
            topic: None,
            content_hash: "h".to_string(),
            created_at: Utc::now(),
        };
        // Images always land under pictures/, whatever the suggestion.
        assert_eq!(target_path(&item, &e), "pictures/rust/ownership-notes.md");
        assert_eq!(commit_message(&item, &e), "Add notes on ownership");
    }
}
