use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Content items: one row per ingested unit. Rows are only created after
    // the raw artifact is durably on disk.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_items (
            id TEXT PRIMARY KEY,
            content_type TEXT NOT NULL,
            raw_file_path TEXT NOT NULL,
            original_name TEXT NOT NULL,
            source_message_id INTEGER NOT NULL,
            source_user_id INTEGER NOT NULL,
            extracted_text TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            summary TEXT,
            topic TEXT,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Decisions: append-only audit history, keyed (content_item_id, seq).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS decisions (
            id TEXT PRIMARY KEY,
            content_item_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            context TEXT NOT NULL,
            options TEXT NOT NULL,
            recommendation TEXT NOT NULL,
            rationale TEXT NOT NULL,
            confidence REAL NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(content_item_id, seq),
            FOREIGN KEY (content_item_id) REFERENCES content_items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Publish records: one row per attempt.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS publish_records (
            id TEXT PRIMARY KEY,
            content_item_id TEXT NOT NULL,
            target_path TEXT NOT NULL,
            commit_message TEXT NOT NULL,
            commit_reference TEXT,
            status TEXT NOT NULL,
            last_step TEXT,
            attempted_at INTEGER NOT NULL,
            FOREIGN KEY (content_item_id) REFERENCES content_items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Effective-once publish: at most one succeeded attempt per item.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_publish_once
        ON publish_records(content_item_id) WHERE status = 'succeeded'
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_items_content_type ON content_items(content_type)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_created_at ON content_items(created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_decisions_item ON decisions(content_item_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_publish_records_item ON publish_records(content_item_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
