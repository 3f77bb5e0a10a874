//! Matrix coverage overview.
//!
//! Recomputes per-competitor coverage from the stores and prints a table.
//! Used by `shotsync coverage` to give confidence that reconciliation and
//! imports are landing where expected. Descriptions are derived data, so
//! recomputing here also refreshes them.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::matrix::MatrixStore;
use crate::models::{Competitor, Region};

pub async fn run_coverage(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let matrix = MatrixStore::new(pool.clone());

    let total_features: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM features")
        .fetch_one(&pool)
        .await?;

    let rows: Vec<(String, String, Option<String>, Option<String>, Option<String>)> =
        sqlx::query_as(
            "SELECT id, name, region, website, description FROM competitors ORDER BY name COLLATE NOCASE",
        )
        .fetch_all(&pool)
        .await?;
    let competitors: Vec<Competitor> = rows
        .into_iter()
        .map(|(id, name, region, website, description)| Competitor {
            id,
            name,
            region: region.as_deref().and_then(Region::parse),
            website,
            description,
        })
        .collect();

    println!("Feature Matrix Coverage");
    println!("=======================");
    println!();
    println!("  features in taxonomy: {}", total_features);
    println!();
    println!("  {:<28} {:<8} {:>10} {:>10}", "COMPETITOR", "REGION", "HAS", "COVERAGE");
    println!("  {}", "-".repeat(60));

    for competitor in &competitors {
        let have: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM competitor_features WHERE competitor_id = ? AND has_feature = 1",
        )
        .bind(&competitor.id)
        .fetch_one(&pool)
        .await?;
        let pct = matrix
            .recompute_coverage(&competitor.id, &config.taxonomy.industry)
            .await?;
        println!(
            "  {:<28} {:<8} {:>4} / {:<4} {:>9.1}%",
            competitor.name,
            competitor.region.map(|r| r.as_str()).unwrap_or("-"),
            have,
            total_features,
            pct
        );
    }

    if competitors.is_empty() {
        println!("  (no competitors yet; run reconcile or import)");
    }
    println!();

    pool.close().await;
    Ok(())
}
