use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS competitors (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            region TEXT,
            website TEXT,
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS features (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            category TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'medium',
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS competitor_features (
            id TEXT PRIMARY KEY,
            competitor_id TEXT NOT NULL,
            feature_id TEXT NOT NULL,
            has_feature INTEGER NOT NULL DEFAULT 0,
            implementation_quality TEXT NOT NULL DEFAULT 'none',
            notes TEXT,
            UNIQUE(competitor_id, feature_id),
            FOREIGN KEY (competitor_id) REFERENCES competitors(id),
            FOREIGN KEY (feature_id) REFERENCES features(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Current screenshot model: scoped under a competitor, feature optional.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS screenshots (
            id TEXT PRIMARY KEY,
            competitor_id TEXT NOT NULL,
            feature_id TEXT,
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            is_onboarding INTEGER NOT NULL DEFAULT 0,
            upload_source TEXT NOT NULL DEFAULT 'manual',
            context TEXT,
            classify_method TEXT,
            classify_confidence REAL,
            dedup_hash TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            UNIQUE(competitor_id, file_name),
            FOREIGN KEY (competitor_id) REFERENCES competitors(id),
            FOREIGN KEY (feature_id) REFERENCES features(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Legacy screenshot model: scoped under a matrix relation row. Kept
    // readable so older data stays visible; new writes go to screenshots.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS relation_screenshots (
            id TEXT PRIMARY KEY,
            competitor_feature_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            context TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (competitor_feature_id) REFERENCES competitor_features(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cells_competitor ON competitor_features(competitor_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_screenshots_competitor ON screenshots(competitor_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_screenshots_feature ON screenshots(feature_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_relation_screenshots_cell ON relation_screenshots(competitor_feature_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
