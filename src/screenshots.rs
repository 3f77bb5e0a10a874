//! Unified screenshot store.
//!
//! Two physical representations exist for historical reasons: the legacy
//! `relation_screenshots` table hangs off a matrix cell, the current
//! `screenshots` table hangs off a competitor with an optional feature
//! pointer. This store presents both as one logical set; new records are
//! always written to the current table.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{NewScreenshot, Representation, Screenshot};

/// Result of a `create` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(String),
    /// A record for the same physical asset already exists; the id of the
    /// existing row is returned and nothing is written.
    SkippedDuplicate(String),
}

#[derive(Debug, Default, Clone)]
pub struct ScreenshotFilter {
    pub competitor_id: Option<String>,
    /// Only screenshots with no feature reference (classification gaps).
    pub unclassified_only: bool,
}

#[derive(Clone)]
pub struct ScreenshotStore {
    pool: SqlitePool,
}

type FlatRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    i64,
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<f64>,
);

type RelationRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    i64,
    String,
    Option<String>,
);

impl ScreenshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn flat_from_row(row: FlatRow) -> Screenshot {
        let (
            id,
            competitor_id,
            feature_id,
            file_name,
            file_path,
            file_size,
            mime_type,
            is_onboarding,
            upload_source,
            context,
            classify_method,
            classify_confidence,
        ) = row;
        Screenshot {
            id,
            competitor_id,
            feature_id,
            file_name,
            file_path,
            file_size,
            mime_type,
            is_onboarding: is_onboarding != 0,
            upload_source,
            context,
            classify_method,
            classify_confidence,
            representation: Representation::Flat,
        }
    }

    fn relation_from_row(row: RelationRow) -> Screenshot {
        let (id, competitor_id, feature_id, file_name, file_path, file_size, mime_type, context) =
            row;
        Screenshot {
            id,
            competitor_id,
            feature_id,
            file_name,
            file_path,
            file_size,
            mime_type,
            is_onboarding: false,
            upload_source: "legacy".to_string(),
            context,
            classify_method: None,
            classify_confidence: None,
            representation: Representation::Relation,
        }
    }

    /// List both representations as one logical set, ordered by file path.
    ///
    /// Legacy rows whose relation no longer resolves are invisible here;
    /// the validator finds those separately.
    pub async fn list_all(&self, filter: &ScreenshotFilter) -> Result<Vec<Screenshot>> {
        let flat_rows: Vec<FlatRow> = sqlx::query_as(
            r#"
            SELECT id, competitor_id, feature_id, file_name, file_path, file_size, mime_type,
                   is_onboarding, upload_source, context, classify_method, classify_confidence
            FROM screenshots
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let relation_rows: Vec<RelationRow> = sqlx::query_as(
            r#"
            SELECT rs.id, cf.competitor_id, cf.feature_id, rs.file_name, rs.file_path,
                   rs.file_size, rs.mime_type, rs.context
            FROM relation_screenshots rs
            JOIN competitor_features cf ON cf.id = rs.competitor_feature_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut all: Vec<Screenshot> = flat_rows
            .into_iter()
            .map(Self::flat_from_row)
            .chain(relation_rows.into_iter().map(Self::relation_from_row))
            .collect();

        if let Some(competitor_id) = &filter.competitor_id {
            all.retain(|s| &s.competitor_id == competitor_id);
        }
        if filter.unclassified_only {
            all.retain(|s| s.feature_id.is_none());
        }

        all.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(all)
    }

    /// Look a screenshot up by its natural key: owning competitor plus
    /// file name or stored path.
    pub async fn find_by_natural_key(
        &self,
        competitor_id: &str,
        file_name_or_path: &str,
    ) -> Result<Option<Screenshot>> {
        let flat: Option<FlatRow> = sqlx::query_as(
            r#"
            SELECT id, competitor_id, feature_id, file_name, file_path, file_size, mime_type,
                   is_onboarding, upload_source, context, classify_method, classify_confidence
            FROM screenshots
            WHERE competitor_id = ? AND (file_name = ? OR file_path = ?)
            "#,
        )
        .bind(competitor_id)
        .bind(file_name_or_path)
        .bind(file_name_or_path)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = flat {
            return Ok(Some(Self::flat_from_row(row)));
        }

        let relation: Option<RelationRow> = sqlx::query_as(
            r#"
            SELECT rs.id, cf.competitor_id, cf.feature_id, rs.file_name, rs.file_path,
                   rs.file_size, rs.mime_type, rs.context
            FROM relation_screenshots rs
            JOIN competitor_features cf ON cf.id = rs.competitor_feature_id
            WHERE cf.competitor_id = ? AND (rs.file_name = ? OR rs.file_path = ?)
            "#,
        )
        .bind(competitor_id)
        .bind(file_name_or_path)
        .bind(file_name_or_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(relation.map(Self::relation_from_row))
    }

    /// Find an existing record for the same physical asset.
    ///
    /// Same (competitor, file name) always matches. When `size_tolerance`
    /// is given, a record whose byte size falls within the tolerance also
    /// matches; that mode is for checking against a remote store that may
    /// have re-encoded the file.
    pub async fn find_duplicate(
        &self,
        competitor_id: &str,
        file_name: &str,
        file_size: i64,
        size_tolerance: Option<i64>,
    ) -> Result<Option<String>> {
        let by_name: Option<String> = sqlx::query_scalar(
            "SELECT id FROM screenshots WHERE competitor_id = ? AND file_name = ?",
        )
        .bind(competitor_id)
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;
        if by_name.is_some() {
            return Ok(by_name);
        }

        let legacy_by_name: Option<String> = sqlx::query_scalar(
            r#"
            SELECT rs.id FROM relation_screenshots rs
            JOIN competitor_features cf ON cf.id = rs.competitor_feature_id
            WHERE cf.competitor_id = ? AND rs.file_name = ?
            "#,
        )
        .bind(competitor_id)
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;
        if legacy_by_name.is_some() {
            return Ok(legacy_by_name);
        }

        if let Some(tolerance) = size_tolerance {
            let by_size: Option<String> = sqlx::query_scalar(
                "SELECT id FROM screenshots WHERE competitor_id = ? AND ABS(file_size - ?) <= ?",
            )
            .bind(competitor_id)
            .bind(file_size)
            .bind(tolerance)
            .fetch_optional(&self.pool)
            .await?;
            if by_size.is_some() {
                return Ok(by_size);
            }
        }

        Ok(None)
    }

    /// Create a screenshot in the current model. Duplicate detection runs
    /// first: a hit is returned as [`CreateOutcome::SkippedDuplicate`] and
    /// nothing is inserted.
    pub async fn create(&self, new: &NewScreenshot) -> Result<CreateOutcome> {
        if let Some(existing) = self
            .find_duplicate(&new.competitor_id, &new.file_name, new.file_size, None)
            .await?
        {
            return Ok(CreateOutcome::SkippedDuplicate(existing));
        }

        // Natural-key hash, for fast cross-store duplicate comparison.
        let mut hasher = Sha256::new();
        hasher.update(new.competitor_id.as_bytes());
        hasher.update(new.file_name.as_bytes());
        hasher.update(new.file_size.to_le_bytes());
        let dedup_hash = format!("{:x}", hasher.finalize());

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO screenshots
                (id, competitor_id, feature_id, file_name, file_path, file_size, mime_type,
                 is_onboarding, upload_source, context, classify_method, classify_confidence,
                 dedup_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.competitor_id)
        .bind(&new.feature_id)
        .bind(&new.file_name)
        .bind(&new.file_path)
        .bind(new.file_size)
        .bind(&new.mime_type)
        .bind(new.is_onboarding as i64)
        .bind(&new.upload_source)
        .bind(&new.context)
        .bind(&new.classify_method)
        .bind(new.classify_confidence)
        .bind(&dedup_hash)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(CreateOutcome::Created(id))
    }

    /// Point a screenshot at a different feature (or clear it).
    ///
    /// A legacy row is migrated into the current table under the same id:
    /// the flat model is the current representation, so the legacy table
    /// only ever shrinks.
    pub async fn reassign_feature(&self, id: &str, feature_id: Option<&str>) -> Result<bool> {
        let updated = sqlx::query("UPDATE screenshots SET feature_id = ? WHERE id = ?")
            .bind(feature_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() > 0 {
            return Ok(true);
        }

        let legacy: Option<RelationRow> = sqlx::query_as(
            r#"
            SELECT rs.id, cf.competitor_id, cf.feature_id, rs.file_name, rs.file_path,
                   rs.file_size, rs.mime_type, rs.context
            FROM relation_screenshots rs
            JOIN competitor_features cf ON cf.id = rs.competitor_feature_id
            WHERE rs.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let legacy = match legacy {
            Some(row) => Self::relation_from_row(row),
            None => return Ok(false),
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO screenshots
                (id, competitor_id, feature_id, file_name, file_path, file_size, mime_type,
                 is_onboarding, upload_source, context, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, 'legacy', ?, ?)
            "#,
        )
        .bind(&legacy.id)
        .bind(&legacy.competitor_id)
        .bind(feature_id)
        .bind(&legacy.file_name)
        .bind(&legacy.file_path)
        .bind(legacy.file_size)
        .bind(&legacy.mime_type)
        .bind(&legacy.context)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM relation_screenshots WHERE id = ?")
            .bind(&legacy.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(true)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let flat = sqlx::query("DELETE FROM screenshots WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if flat.rows_affected() > 0 {
            return Ok(true);
        }
        let legacy = sqlx::query("DELETE FROM relation_screenshots WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(legacy.rows_affected() > 0)
    }
}
