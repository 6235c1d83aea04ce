//! Crash recovery.
//!
//! A run can be interrupted between the raw write and the metadata commit,
//! or between a persisted publish decision and a successful publish. Both
//! gaps are observable from the database alone, so recovery is a pure
//! replay: resume interrupted items from enrichment onward, and re-drive
//! pending publishes. Succeeded publishes are never re-sent; the store's
//! effective-once gate holds across restarts.

use anyhow::Result;
use tracing::{info, warn};

use crate::decision;
use crate::models::PublishStatus;
use crate::pipeline::Pipeline;
use crate::store::MetadataStore;

#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Items whose interrupted run was replayed to a decision.
    pub resumed: usize,
    /// Items with a pending publish that was re-attempted.
    pub retried: usize,
    /// Retries that ended in a successful publish.
    pub published: usize,
}

/// Scan for interrupted work and replay it. Safe to run at every startup;
/// does nothing when the store is consistent.
pub async fn run(pipeline: &Pipeline, store: &MetadataStore) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    for item in store.items_missing_decision().await? {
        let id = item.id.clone();
        match pipeline.resume(item).await {
            Ok(_) => report.resumed += 1,
            Err(e) => warn!(item_id = %id, error = %e, "resume failed, item left for next pass"),
        }
    }

    for item in store.publish_retry_candidates().await? {
        let id = item.id.clone();
        report.retried += 1;
        match pipeline
            .publish_existing(item, decision::command_trigger("reconcile"))
            .await
        {
            Ok(outcome) => {
                if outcome
                    .publish
                    .as_ref()
                    .is_some_and(|r| r.status == PublishStatus::Succeeded)
                {
                    report.published += 1;
                }
            }
            Err(e) => warn!(item_id = %id, error = %e, "publish retry failed"),
        }
    }

    if report.resumed > 0 || report.retried > 0 {
        info!(
            resumed = report.resumed,
            retried = report.retried,
            published = report.published,
            "reconcile pass complete"
        );
    }
    Ok(report)
}
