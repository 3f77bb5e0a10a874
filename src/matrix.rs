//! Competitor ↔ feature matrix store.
//!
//! Every write is an upsert keyed on (competitor_id, feature_id), so the
//! one-row-per-pair invariant holds no matter how often reconciliation
//! runs. `has_feature` is monotonic: once true it stays true until an
//! explicit bulk reset.

use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{MatrixCell, Quality};

/// Fields to merge into a cell. Absent fields are left untouched.
#[derive(Debug, Default, Clone)]
pub struct CellPatch {
    pub has_feature: Option<bool>,
    pub quality: Option<Quality>,
    pub notes: Option<String>,
}

impl CellPatch {
    pub fn attach_screenshot() -> Self {
        Self {
            has_feature: Some(true),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct MatrixStore {
    pool: SqlitePool,
}

impl MatrixStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the cell if absent, else merge the supplied fields into it.
    /// Returns the cell id. A `has_feature: Some(false)` patch never
    /// downgrades an existing true cell; only [`reset_competitor`] does.
    ///
    /// [`reset_competitor`]: MatrixStore::reset_competitor
    pub async fn upsert_cell(
        &self,
        competitor_id: &str,
        feature_id: &str,
        patch: CellPatch,
    ) -> Result<String> {
        let existing: Option<(String, i64, String, Option<String>)> = sqlx::query_as(
            "SELECT id, has_feature, implementation_quality, notes FROM competitor_features WHERE competitor_id = ? AND feature_id = ?",
        )
        .bind(competitor_id)
        .bind(feature_id)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some((id, has_feature, quality, notes)) => {
                let has_feature = has_feature != 0 || patch.has_feature.unwrap_or(false);
                let quality = patch
                    .quality
                    .map(|q| q.as_str().to_string())
                    .unwrap_or(quality);
                let notes = patch.notes.or(notes);
                sqlx::query(
                    "UPDATE competitor_features SET has_feature = ?, implementation_quality = ?, notes = ? WHERE id = ?",
                )
                .bind(has_feature as i64)
                .bind(&quality)
                .bind(&notes)
                .bind(&id)
                .execute(&self.pool)
                .await?;
                Ok(id)
            }
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO competitor_features (id, competitor_id, feature_id, has_feature, implementation_quality, notes) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(competitor_id)
                .bind(feature_id)
                .bind(patch.has_feature.unwrap_or(false) as i64)
                .bind(patch.quality.unwrap_or_default().as_str())
                .bind(&patch.notes)
                .execute(&self.pool)
                .await?;
                Ok(id)
            }
        }
    }

    pub async fn get_cell(
        &self,
        competitor_id: &str,
        feature_id: &str,
    ) -> Result<Option<MatrixCell>> {
        let row: Option<(String, i64, String, Option<String>)> = sqlx::query_as(
            "SELECT id, has_feature, implementation_quality, notes FROM competitor_features WHERE competitor_id = ? AND feature_id = ?",
        )
        .bind(competitor_id)
        .bind(feature_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, has_feature, quality, notes)| MatrixCell {
            id,
            competitor_id: competitor_id.to_string(),
            feature_id: feature_id.to_string(),
            has_feature: has_feature != 0,
            quality: Quality::parse(&quality).unwrap_or_default(),
            notes,
        }))
    }

    /// Explicit bulk reset: clears `has_feature` for every cell of one
    /// competitor. The only path that regresses a true cell.
    pub async fn reset_competitor(&self, competitor_id: &str) -> Result<u64> {
        let result =
            sqlx::query("UPDATE competitor_features SET has_feature = 0 WHERE competitor_id = ?")
                .bind(competitor_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Recompute a competitor's coverage percentage and write it back into
    /// the derived description. The text before ` - coverage:` survives
    /// recomputes; new competitors get the configured industry label.
    pub async fn recompute_coverage(&self, competitor_id: &str, industry: &str) -> Result<f64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM features")
            .fetch_one(&self.pool)
            .await?;
        let have: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM competitor_features WHERE competitor_id = ? AND has_feature = 1",
        )
        .bind(competitor_id)
        .fetch_one(&self.pool)
        .await?;

        let pct = if total > 0 {
            round1(have as f64 * 100.0 / total as f64)
        } else {
            0.0
        };

        let description: Option<Option<String>> =
            sqlx::query_scalar("SELECT description FROM competitors WHERE id = ?")
                .bind(competitor_id)
                .fetch_optional(&self.pool)
                .await?;
        let prefix = description
            .flatten()
            .and_then(|d| d.split(" - coverage:").next().map(str::to_string))
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| industry.to_string());

        sqlx::query("UPDATE competitors SET description = ? WHERE id = ?")
            .bind(format!("{} - coverage: {:.1}%", prefix, pct))
            .bind(competitor_id)
            .execute(&self.pool)
            .await?;

        Ok(pct)
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// How a raw matrix import cell reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellMark {
    Yes,
    No,
    /// Non-empty value outside the accepted set; treated as "no" but
    /// surfaced for manual review.
    Unrecognized,
}

/// Interpret a raw spreadsheet cell. The accepted "has feature" set is
/// fixed; everything else is "no".
pub fn interpret_cell(raw: &str) -> CellMark {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return CellMark::No;
    }
    match trimmed.to_lowercase().as_str() {
        "var" | "yes" | "true" | "x" | "1" | "✓" | "✔" | "☑" => CellMark::Yes,
        "no" | "-" | "yok" | "false" | "0" => CellMark::No,
        _ => CellMark::Unrecognized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::apply(&pool).await.unwrap();
        pool
    }

    async fn seed(pool: &SqlitePool) {
        sqlx::query("INSERT INTO competitors (id, name) VALUES ('c1', 'BTCTurk')")
            .execute(pool)
            .await
            .unwrap();
        for (id, name) in [("f1", "Staking"), ("f2", "Dark Mode"), ("f3", "Spot Trading"), ("f4", "Price Alerts")] {
            sqlx::query("INSERT INTO features (id, name, category) VALUES (?, ?, 'test')")
                .bind(id)
                .bind(name)
                .execute(pool)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_merges() {
        let pool = test_pool().await;
        seed(&pool).await;
        let store = MatrixStore::new(pool.clone());

        let id1 = store
            .upsert_cell("c1", "f1", CellPatch::attach_screenshot())
            .await
            .unwrap();
        let id2 = store
            .upsert_cell(
                "c1",
                "f1",
                CellPatch {
                    quality: Some(Quality::Good),
                    ..CellPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(id1, id2);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM competitor_features")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let cell = store.get_cell("c1", "f1").await.unwrap().unwrap();
        // Merge kept has_feature and applied quality.
        assert!(cell.has_feature);
        assert_eq!(cell.quality, Quality::Good);
    }

    #[tokio::test]
    async fn test_has_feature_is_monotonic() {
        let pool = test_pool().await;
        seed(&pool).await;
        let store = MatrixStore::new(pool.clone());

        store
            .upsert_cell("c1", "f1", CellPatch::attach_screenshot())
            .await
            .unwrap();
        store
            .upsert_cell(
                "c1",
                "f1",
                CellPatch {
                    has_feature: Some(false),
                    ..CellPatch::default()
                },
            )
            .await
            .unwrap();

        let cell = store.get_cell("c1", "f1").await.unwrap().unwrap();
        assert!(cell.has_feature, "has_feature must not regress on upsert");

        // The explicit bulk reset is the one allowed regression.
        store.reset_competitor("c1").await.unwrap();
        let cell = store.get_cell("c1", "f1").await.unwrap().unwrap();
        assert!(!cell.has_feature);
    }

    #[tokio::test]
    async fn test_merge_does_not_clear_absent_fields() {
        let pool = test_pool().await;
        seed(&pool).await;
        let store = MatrixStore::new(pool.clone());

        store
            .upsert_cell(
                "c1",
                "f1",
                CellPatch {
                    has_feature: Some(true),
                    quality: Some(Quality::Basic),
                    notes: Some("seen in v3.2".to_string()),
                },
            )
            .await
            .unwrap();
        store
            .upsert_cell("c1", "f1", CellPatch::default())
            .await
            .unwrap();

        let cell = store.get_cell("c1", "f1").await.unwrap().unwrap();
        assert!(cell.has_feature);
        assert_eq!(cell.quality, Quality::Basic);
        assert_eq!(cell.notes.as_deref(), Some("seen in v3.2"));
    }

    #[tokio::test]
    async fn test_recompute_coverage_rounds_and_writes_description() {
        let pool = test_pool().await;
        seed(&pool).await;
        let store = MatrixStore::new(pool.clone());

        store
            .upsert_cell("c1", "f1", CellPatch::attach_screenshot())
            .await
            .unwrap();

        // 1 of 4 features = 25.0%
        let pct = store
            .recompute_coverage("c1", "Crypto exchange")
            .await
            .unwrap();
        assert_eq!(pct, 25.0);

        let description: Option<String> =
            sqlx::query_scalar("SELECT description FROM competitors WHERE id = 'c1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(
            description.as_deref(),
            Some("Crypto exchange - coverage: 25.0%")
        );

        // A second recompute preserves the prefix.
        store
            .upsert_cell("c1", "f2", CellPatch::attach_screenshot())
            .await
            .unwrap();
        store
            .upsert_cell("c1", "f3", CellPatch::attach_screenshot())
            .await
            .unwrap();
        let pct = store
            .recompute_coverage("c1", "ignored")
            .await
            .unwrap();
        assert_eq!(pct, 75.0);
        let description: Option<String> =
            sqlx::query_scalar("SELECT description FROM competitors WHERE id = 'c1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(
            description.as_deref(),
            Some("Crypto exchange - coverage: 75.0%")
        );
    }

    #[test]
    fn test_interpret_cell_accepted_set() {
        for raw in ["Var", "var", "Yes", "TRUE", "X", "x", "1", "✓", "✔"] {
            assert_eq!(interpret_cell(raw), CellMark::Yes, "raw = {}", raw);
        }
        for raw in ["", "  ", "no", "-", "0", "Yok"] {
            assert_eq!(interpret_cell(raw), CellMark::No, "raw = {}", raw);
        }
        assert_eq!(interpret_cell("maybe?"), CellMark::Unrecognized);
        assert_eq!(interpret_cell("partial"), CellMark::Unrecognized);
    }

    #[test]
    fn test_round1() {
        assert_eq!(round1(33.333), 33.3);
        assert_eq!(round1(66.666), 66.7);
        assert_eq!(round1(0.0), 0.0);
    }
}
