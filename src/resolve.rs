//! Canonical entity resolution for competitor and feature labels.
//!
//! Free-text labels arrive from folder names, matrix import cells, and
//! remote API payloads. Resolution is alias-table lookup first (exact,
//! case-insensitive after trim), then a database name lookup, then a
//! documented containment fallback for labels with no alias entry.
//!
//! Competitors self-bootstrap: an unknown label creates a canonical row so
//! a filesystem scan can discover new competitors. Features never do —
//! the feature list is closed and only `seed` writes it.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Result of resolving a competitor label.
#[derive(Debug, Clone)]
pub struct ResolvedCompetitor {
    /// Canonical row id. `None` only in dry-run for a row that does not
    /// exist yet.
    pub id: Option<String>,
    pub name: String,
    pub created: bool,
}

pub struct EntityResolver<'a> {
    pool: &'a SqlitePool,
    aliases: &'a BTreeMap<String, String>,
}

impl<'a> EntityResolver<'a> {
    pub fn new(pool: &'a SqlitePool, aliases: &'a BTreeMap<String, String>) -> Self {
        Self { pool, aliases }
    }

    fn alias_lookup(&self, label: &str) -> Option<String> {
        self.aliases
            .iter()
            .find(|(alias, _)| alias.trim().eq_ignore_ascii_case(label))
            .map(|(_, canonical)| canonical.clone())
    }

    /// Apply the alias table to a raw label. Lookup only, never fuzzy.
    pub fn canonical_name(&self, label: &str) -> String {
        let trimmed = label.trim();
        self.alias_lookup(trimmed)
            .unwrap_or_else(|| trimmed.to_string())
    }

    /// Resolve a competitor label to its canonical row, creating the row
    /// on first sight unless `dry_run` is set (then the would-be creation
    /// is reported with `id: None`).
    pub async fn resolve_competitor(
        &self,
        label: &str,
        dry_run: bool,
    ) -> Result<ResolvedCompetitor> {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            bail!("empty competitor label");
        }
        let had_alias = self.alias_lookup(trimmed).is_some();
        let canonical = self.canonical_name(trimmed);

        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM competitors WHERE name = ? COLLATE NOCASE")
                .bind(&canonical)
                .fetch_optional(self.pool)
                .await?;
        if let Some(id) = existing {
            return Ok(ResolvedCompetitor {
                id: Some(id),
                name: canonical,
                created: false,
            });
        }

        // Containment fallback, only for labels the alias table does not
        // know about. Very short labels are excluded to keep this tame.
        if !had_alias && canonical.len() >= 3 {
            let needle = canonical.to_lowercase();
            let rows: Vec<(String, String)> =
                sqlx::query_as("SELECT id, name FROM competitors ORDER BY name")
                    .fetch_all(self.pool)
                    .await?;
            for (id, name) in rows {
                let existing = name.to_lowercase();
                if existing.contains(&needle) || needle.contains(&existing) {
                    return Ok(ResolvedCompetitor {
                        id: Some(id),
                        name,
                        created: false,
                    });
                }
            }
        }

        if dry_run {
            return Ok(ResolvedCompetitor {
                id: None,
                name: canonical,
                created: true,
            });
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO competitors (id, name) VALUES (?, ?)")
            .bind(&id)
            .bind(&canonical)
            .execute(self.pool)
            .await?;

        Ok(ResolvedCompetitor {
            id: Some(id),
            name: canonical,
            created: true,
        })
    }

    /// Resolve a feature label to `(id, name)`. Features are a closed list:
    /// a miss returns `None` and never creates a row.
    pub async fn resolve_feature(&self, label: &str) -> Result<Option<(String, String)>> {
        let canonical = self.canonical_name(label);
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT id, name FROM features WHERE name = ? COLLATE NOCASE")
                .bind(&canonical)
                .fetch_optional(self.pool)
                .await?;
        Ok(row)
    }

    /// Merge duplicate competitor rows into a designated survivor.
    ///
    /// Re-points every matrix cell and screenshot owned by each loser to
    /// the survivor. A cell move that would collide with an existing
    /// survivor cell is discarded after its legacy screenshots are
    /// re-pointed to the surviving cell, so no screenshot is ever lost;
    /// `has_feature` is carried over so the matrix never regresses. A flat
    /// screenshot whose file name already exists under the survivor is the
    /// same physical asset and is dropped as a duplicate. Losers that no
    /// longer exist are skipped, so re-running the merge is safe.
    pub async fn merge_duplicates(&self, survivor: &str, losers: &[String]) -> Result<MergeReport> {
        let survivor_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM competitors WHERE name = ? COLLATE NOCASE")
                .bind(survivor.trim())
                .fetch_optional(self.pool)
                .await?;
        let survivor_id = match survivor_id {
            Some(id) => id,
            None => bail!("merge survivor '{}' does not exist", survivor),
        };

        let mut report = MergeReport::default();

        for loser in losers {
            let loser_id: Option<String> =
                sqlx::query_scalar("SELECT id FROM competitors WHERE name = ? COLLATE NOCASE")
                    .bind(loser.trim())
                    .fetch_optional(self.pool)
                    .await?;
            let loser_id = match loser_id {
                Some(id) => id,
                None => continue,
            };
            if loser_id == survivor_id {
                continue;
            }

            let mut tx = self.pool.begin().await?;

            let cells: Vec<(String, String, i64)> = sqlx::query_as(
                "SELECT id, feature_id, has_feature FROM competitor_features WHERE competitor_id = ?",
            )
            .bind(&loser_id)
            .fetch_all(&mut *tx)
            .await?;

            for (cell_id, feature_id, has_feature) in cells {
                let surviving_cell: Option<String> = sqlx::query_scalar(
                    "SELECT id FROM competitor_features WHERE competitor_id = ? AND feature_id = ?",
                )
                .bind(&survivor_id)
                .bind(&feature_id)
                .fetch_optional(&mut *tx)
                .await?;

                match surviving_cell {
                    Some(surviving_cell) => {
                        // The move would violate (competitor, feature)
                        // uniqueness: keep the screenshots, drop the cell.
                        sqlx::query(
                            "UPDATE relation_screenshots SET competitor_feature_id = ? WHERE competitor_feature_id = ?",
                        )
                        .bind(&surviving_cell)
                        .bind(&cell_id)
                        .execute(&mut *tx)
                        .await?;
                        if has_feature != 0 {
                            sqlx::query(
                                "UPDATE competitor_features SET has_feature = 1 WHERE id = ?",
                            )
                            .bind(&surviving_cell)
                            .execute(&mut *tx)
                            .await?;
                        }
                        sqlx::query("DELETE FROM competitor_features WHERE id = ?")
                            .bind(&cell_id)
                            .execute(&mut *tx)
                            .await?;
                        report.dropped_cells += 1;
                    }
                    None => {
                        sqlx::query("UPDATE competitor_features SET competitor_id = ? WHERE id = ?")
                            .bind(&survivor_id)
                            .bind(&cell_id)
                            .execute(&mut *tx)
                            .await?;
                        report.moved_cells += 1;
                    }
                }
            }

            let shots: Vec<(String, String)> =
                sqlx::query_as("SELECT id, file_name FROM screenshots WHERE competitor_id = ?")
                    .bind(&loser_id)
                    .fetch_all(&mut *tx)
                    .await?;
            for (shot_id, file_name) in shots {
                let collision: Option<String> = sqlx::query_scalar(
                    "SELECT id FROM screenshots WHERE competitor_id = ? AND file_name = ?",
                )
                .bind(&survivor_id)
                .bind(&file_name)
                .fetch_optional(&mut *tx)
                .await?;
                if collision.is_some() {
                    sqlx::query("DELETE FROM screenshots WHERE id = ?")
                        .bind(&shot_id)
                        .execute(&mut *tx)
                        .await?;
                    report.deduped_screenshots += 1;
                } else {
                    sqlx::query("UPDATE screenshots SET competitor_id = ? WHERE id = ?")
                        .bind(&survivor_id)
                        .bind(&shot_id)
                        .execute(&mut *tx)
                        .await?;
                    report.moved_screenshots += 1;
                }
            }

            sqlx::query("DELETE FROM competitors WHERE id = ?")
                .bind(&loser_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            report.merged_competitors += 1;
        }

        Ok(report)
    }
}

/// Counts from a duplicate-merge run.
#[derive(Debug, Default, Clone)]
pub struct MergeReport {
    pub merged_competitors: u64,
    pub moved_cells: u64,
    pub dropped_cells: u64,
    pub moved_screenshots: u64,
    pub deduped_screenshots: u64,
}

/// CLI entry for `shotsync merge`.
pub async fn run_merge(
    config: &crate::config::Config,
    survivor: &str,
    losers: &[String],
) -> Result<()> {
    let pool = crate::db::connect(config).await?;
    let resolver = EntityResolver::new(&pool, &config.aliases);
    let report = resolver.merge_duplicates(survivor, losers).await?;

    println!("merge into '{}'", survivor);
    println!("  merged competitors: {}", report.merged_competitors);
    println!(
        "  matrix cells: {} moved, {} dropped (duplicates)",
        report.moved_cells, report.dropped_cells
    );
    println!(
        "  screenshots: {} moved, {} deduplicated",
        report.moved_screenshots, report.deduped_screenshots
    );
    println!("ok");

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        // A single connection keeps every query on the same in-memory db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::apply(&pool).await.unwrap();
        pool
    }

    fn aliases() -> BTreeMap<String, String> {
        [("BTC Turk", "BTCTurk"), ("Binance Turkey", "Binance TR")]
            .iter()
            .map(|(a, c)| (a.to_string(), c.to_string()))
            .collect()
    }

    async fn insert_competitor(pool: &SqlitePool, id: &str, name: &str) {
        sqlx::query("INSERT INTO competitors (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn insert_feature(pool: &SqlitePool, id: &str, name: &str) {
        sqlx::query("INSERT INTO features (id, name, category) VALUES (?, ?, 'test')")
            .bind(id)
            .bind(name)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_alias_resolves_to_canonical_row() {
        let pool = test_pool().await;
        insert_competitor(&pool, "c1", "BTCTurk").await;
        let aliases = aliases();
        let resolver = EntityResolver::new(&pool, &aliases);

        let resolved = resolver.resolve_competitor("BTC Turk", false).await.unwrap();
        assert_eq!(resolved.id.as_deref(), Some("c1"));
        assert_eq!(resolved.name, "BTCTurk");
        assert!(!resolved.created);
    }

    #[tokio::test]
    async fn test_unknown_competitor_self_bootstraps() {
        let pool = test_pool().await;
        let aliases = aliases();
        let resolver = EntityResolver::new(&pool, &aliases);

        let first = resolver.resolve_competitor("Kraken", false).await.unwrap();
        assert!(first.created);
        let second = resolver.resolve_competitor("kraken", false).await.unwrap();
        assert!(!second.created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_dry_run_never_creates() {
        let pool = test_pool().await;
        let aliases = aliases();
        let resolver = EntityResolver::new(&pool, &aliases);

        let resolved = resolver.resolve_competitor("Kraken", true).await.unwrap();
        assert!(resolved.created);
        assert!(resolved.id.is_none());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM competitors")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_containment_fallback_without_alias() {
        let pool = test_pool().await;
        insert_competitor(&pool, "c1", "Garanti BBVA Kripto").await;
        let aliases = aliases();
        let resolver = EntityResolver::new(&pool, &aliases);

        let resolved = resolver
            .resolve_competitor("BBVA Kripto", false)
            .await
            .unwrap();
        assert_eq!(resolved.id.as_deref(), Some("c1"));
        assert!(!resolved.created);
    }

    #[tokio::test]
    async fn test_feature_miss_never_creates() {
        let pool = test_pool().await;
        let aliases = aliases();
        let resolver = EntityResolver::new(&pool, &aliases);

        assert!(resolver.resolve_feature("Time Travel").await.unwrap().is_none());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM features")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    async fn seed_merge_fixture(pool: &SqlitePool) {
        insert_competitor(pool, "surv", "Binance Global").await;
        insert_competitor(pool, "lose", "Binance").await;
        insert_feature(pool, "f1", "Staking").await;
        insert_feature(pool, "f2", "Dark Mode").await;

        // Survivor already has a Staking cell; the loser's Staking cell
        // must be discarded, its Dark Mode cell moved.
        sqlx::query("INSERT INTO competitor_features (id, competitor_id, feature_id, has_feature) VALUES ('cell-s', 'surv', 'f1', 0)")
            .execute(pool).await.unwrap();
        sqlx::query("INSERT INTO competitor_features (id, competitor_id, feature_id, has_feature) VALUES ('cell-l1', 'lose', 'f1', 1)")
            .execute(pool).await.unwrap();
        sqlx::query("INSERT INTO competitor_features (id, competitor_id, feature_id, has_feature) VALUES ('cell-l2', 'lose', 'f2', 1)")
            .execute(pool).await.unwrap();

        sqlx::query("INSERT INTO relation_screenshots (id, competitor_feature_id, file_name, file_path, file_size, mime_type, created_at) VALUES ('rs1', 'cell-l1', 'old.png', 'Binance/Staking/old.png', 100, 'image/png', 0)")
            .execute(pool).await.unwrap();
        sqlx::query("INSERT INTO screenshots (id, competitor_id, feature_id, file_name, file_path, file_size, mime_type, created_at) VALUES ('s1', 'lose', 'f2', 'dark.png', 'Binance/Dark Mode/dark.png', 100, 'image/png', 0)")
            .execute(pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_merge_duplicates_scenario() {
        let pool = test_pool().await;
        seed_merge_fixture(&pool).await;
        let aliases = aliases();
        let resolver = EntityResolver::new(&pool, &aliases);

        let report = resolver
            .merge_duplicates("Binance Global", &["Binance".to_string()])
            .await
            .unwrap();
        assert_eq!(report.merged_competitors, 1);
        assert_eq!(report.moved_cells, 1);
        assert_eq!(report.dropped_cells, 1);
        assert_eq!(report.moved_screenshots, 1);

        // The loser is gone.
        let losers: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM competitors WHERE name = 'Binance'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(losers, 0);

        // No uniqueness violation remains and every cell belongs to the survivor.
        let cells: Vec<(String, i64)> = sqlx::query_as(
            "SELECT competitor_id, has_feature FROM competitor_features ORDER BY feature_id",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(cells.len(), 2);
        assert!(cells.iter().all(|(c, _)| c == "surv"));
        // has_feature carried over from the discarded cell.
        assert_eq!(cells[0].1, 1);

        // No screenshot was lost: the legacy one now hangs off the
        // surviving cell, the flat one off the survivor.
        let relation_owner: String =
            sqlx::query_scalar("SELECT competitor_feature_id FROM relation_screenshots WHERE id = 'rs1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(relation_owner, "cell-s");
        let flat_owner: String =
            sqlx::query_scalar("SELECT competitor_id FROM screenshots WHERE id = 's1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(flat_owner, "surv");
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let pool = test_pool().await;
        seed_merge_fixture(&pool).await;
        let aliases = aliases();
        let resolver = EntityResolver::new(&pool, &aliases);

        resolver
            .merge_duplicates("Binance Global", &["Binance".to_string()])
            .await
            .unwrap();
        let second = resolver
            .merge_duplicates("Binance Global", &["Binance".to_string()])
            .await
            .unwrap();
        assert_eq!(second.merged_competitors, 0);
        assert_eq!(second.moved_cells, 0);
        assert_eq!(second.moved_screenshots, 0);
    }
}
