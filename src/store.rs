//! Metadata store.
//!
//! Transactional persistence for content items, decisions, and publish
//! records. The item insert happens right after the raw write (pre-enrichment
//! fields only); the enrichment update and decision append share one
//! transaction so metadata is never half-written. Decisions are append-only.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::PipelineError;
use crate::models::{
    ContentItem, ContentType, Decision, EnrichmentResult, PublishRecord, PublishStatus,
    Recommendation,
};

#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a freshly stored item (pre-enrichment fields only). Called only
    /// after the raw write succeeded; failure is fatal to the run.
    pub async fn insert_item(&self, item: &ContentItem) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            INSERT INTO content_items
                (id, content_type, raw_file_path, original_name, source_message_id,
                 source_user_id, extracted_text, tags, summary, topic, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(item.content_type.as_str())
        .bind(&item.raw_file_path)
        .bind(&item.original_name)
        .bind(item.source_message_id)
        .bind(item.source_user_id)
        .bind(&item.extracted_text)
        .bind(serde_json::to_string(&item.tags).unwrap_or_else(|_| "[]".to_string()))
        .bind(&item.summary)
        .bind(&item.topic)
        .bind(&item.content_hash)
        .bind(item.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::MetadataPersist(e.to_string()))?;

        Ok(())
    }

    /// Commit the enrichment fields and the decision in a single transaction.
    /// The item is updated at most once; the decision is appended, never
    /// overwritten.
    pub async fn finalize_item(
        &self,
        item_id: &str,
        extracted_text: Option<&str>,
        enrichment: &EnrichmentResult,
        decision: &Decision,
    ) -> Result<(), PipelineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PipelineError::MetadataPersist(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE content_items
            SET extracted_text = ?, tags = ?, summary = ?, topic = ?
            WHERE id = ?
            "#,
        )
        .bind(extracted_text)
        .bind(serde_json::to_string(&enrichment.tags).unwrap_or_else(|_| "[]".to_string()))
        .bind(&enrichment.summary)
        .bind(&enrichment.topic)
        .bind(item_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| PipelineError::MetadataPersist(e.to_string()))?;

        insert_decision(&mut tx, decision)
            .await
            .map_err(|e| PipelineError::MetadataPersist(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| PipelineError::MetadataPersist(e.to_string()))?;

        Ok(())
    }

    /// Append a decision outside the finalize transaction (used when
    /// re-processing an already persisted item, e.g. `publish last`).
    pub async fn append_decision(&self, decision: &Decision) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_decision(&mut tx, decision).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Next append-only sequence number for an item's decision history.
    pub async fn next_decision_seq(&self, item_id: &str) -> Result<i64> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(seq) FROM decisions WHERE content_item_id = ?")
                .bind(item_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(max.unwrap_or(0) + 1)
    }

    pub async fn get_item(&self, id: &str) -> Result<Option<ContentItem>> {
        let row = sqlx::query("SELECT * FROM content_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| item_from_row(&r)).transpose()
    }

    pub async fn list_by_type(&self, content_type: ContentType, limit: i64) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query(
            "SELECT * FROM content_items WHERE content_type = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(content_type.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Case-insensitive LIKE match over name, tags, summary, and topic.
    pub async fn search_keyword(&self, keyword: &str, limit: i64) -> Result<Vec<ContentItem>> {
        let pattern = format!("%{}%", keyword);
        let rows = sqlx::query(
            r#"
            SELECT * FROM content_items
            WHERE original_name LIKE ? OR tags LIKE ? OR summary LIKE ? OR topic LIKE ?
            ORDER BY created_at DESC LIMIT ?
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    pub async fn filter_by_date(&self, date: NaiveDate, limit: i64) -> Result<Vec<ContentItem>> {
        let start = date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0);
        let end = start + 24 * 60 * 60;
        let rows = sqlx::query(
            r#"
            SELECT * FROM content_items
            WHERE created_at >= ? AND created_at < ?
            ORDER BY created_at DESC LIMIT ?
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Most recent item without a succeeded publish record.
    pub async fn latest_unpublished(&self) -> Result<Option<ContentItem>> {
        let row = sqlx::query(
            r#"
            SELECT i.* FROM content_items i
            WHERE NOT EXISTS (
                SELECT 1 FROM publish_records p
                WHERE p.content_item_id = i.id AND p.status = 'succeeded'
            )
            ORDER BY i.created_at DESC LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| item_from_row(&r)).transpose()
    }

    /// Items interrupted before their decision was persisted. These are
    /// replayed from enrichment onward on startup reconciliation.
    pub async fn items_missing_decision(&self) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query(
            r#"
            SELECT i.* FROM content_items i
            WHERE NOT EXISTS (
                SELECT 1 FROM decisions d WHERE d.content_item_id = i.id
            )
            ORDER BY i.created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    pub async fn decisions_for_item(&self, item_id: &str) -> Result<Vec<Decision>> {
        let rows = sqlx::query(
            "SELECT * FROM decisions WHERE content_item_id = ? ORDER BY seq ASC",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decision_from_row).collect()
    }

    pub async fn recent_decisions(&self, limit: i64) -> Result<Vec<Decision>> {
        let rows = sqlx::query("SELECT * FROM decisions ORDER BY created_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decision_from_row).collect()
    }

    /// The succeeded publish record for an item, if any. Presence of one
    /// short-circuits any further publish attempt.
    pub async fn succeeded_publish(&self, item_id: &str) -> Result<Option<PublishRecord>> {
        let row = sqlx::query(
            "SELECT * FROM publish_records WHERE content_item_id = ? AND status = 'succeeded'",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| publish_record_from_row(&r)).transpose()
    }

    pub async fn insert_publish_record(&self, record: &PublishRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO publish_records
                (id, content_item_id, target_path, commit_message, commit_reference,
                 status, last_step, attempted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.content_item_id)
        .bind(&record.target_path)
        .bind(&record.commit_message)
        .bind(&record.commit_reference)
        .bind(record.status.as_str())
        .bind(&record.last_step)
        .bind(record.attempted_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Items whose publish was attempted but never succeeded, eligible for
    /// out-of-band retry.
    pub async fn publish_retry_candidates(&self) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT i.* FROM content_items i
            JOIN publish_records p ON p.content_item_id = i.id
            WHERE NOT EXISTS (
                SELECT 1 FROM publish_records s
                WHERE s.content_item_id = i.id AND s.status = 'succeeded'
            )
            ORDER BY i.created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }
}

async fn insert_decision(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    decision: &Decision,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO decisions
            (id, content_item_id, seq, context, options, recommendation,
             rationale, confidence, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&decision.id)
    .bind(&decision.content_item_id)
    .bind(decision.seq)
    .bind(&decision.context)
    .bind(serde_json::to_string(&decision.options).unwrap_or_else(|_| "[]".to_string()))
    .bind(decision.recommendation.as_str())
    .bind(&decision.rationale)
    .bind(decision.confidence)
    .bind(decision.created_at.timestamp())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn item_from_row(row: &SqliteRow) -> Result<ContentItem> {
    let content_type: String = row.try_get("content_type")?;
    let tags_json: String = row.try_get("tags")?;
    Ok(ContentItem {
        id: row.try_get("id")?,
        content_type: ContentType::parse(&content_type)
            .ok_or_else(|| anyhow::anyhow!("unknown content type in db: {}", content_type))?,
        raw_file_path: row.try_get("raw_file_path")?,
        original_name: row.try_get("original_name")?,
        source_message_id: row.try_get("source_message_id")?,
        source_user_id: row.try_get("source_user_id")?,
        extracted_text: row.try_get("extracted_text")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        summary: row.try_get("summary")?,
        topic: row.try_get("topic")?,
        content_hash: row.try_get("content_hash")?,
        created_at: timestamp(row.try_get("created_at")?),
    })
}

fn decision_from_row(row: &SqliteRow) -> Result<Decision> {
    let recommendation: String = row.try_get("recommendation")?;
    let options_json: String = row.try_get("options")?;
    Ok(Decision {
        id: row.try_get("id")?,
        content_item_id: row.try_get("content_item_id")?,
        seq: row.try_get("seq")?,
        context: row.try_get("context")?,
        options: serde_json::from_str(&options_json).unwrap_or_default(),
        recommendation: Recommendation::parse(&recommendation)
            .ok_or_else(|| anyhow::anyhow!("unknown recommendation in db: {}", recommendation))?,
        rationale: row.try_get("rationale")?,
        confidence: row.try_get("confidence")?,
        created_at: timestamp(row.try_get("created_at")?),
    })
}

fn publish_record_from_row(row: &SqliteRow) -> Result<PublishRecord> {
    let status: String = row.try_get("status")?;
    Ok(PublishRecord {
        id: row.try_get("id")?,
        content_item_id: row.try_get("content_item_id")?,
        target_path: row.try_get("target_path")?,
        commit_message: row.try_get("commit_message")?,
        commit_reference: row.try_get("commit_reference")?,
        status: PublishStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("unknown publish status in db: {}", status))?,
        last_step: row.try_get("last_step")?,
        attempted_at: timestamp(row.try_get("attempted_at")?),
    })
}
