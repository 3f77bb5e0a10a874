use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;

use crate::config::{Config, FeatureSpec, SeedCompetitor};
use crate::db;

/// Alternate seed source for `seed --file`.
#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    features: Vec<FeatureSpec>,
    #[serde(default)]
    competitors: Vec<SeedCompetitor>,
}

/// Seed the closed feature taxonomy and any configured competitors.
/// This is the only path that creates Feature rows; upserts by name keep
/// re-runs safe.
pub async fn run_seed(config: &Config, file: Option<&Path>) -> Result<()> {
    let (features, competitors) = match file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
            let seed_file: SeedFile = toml::from_str(&content)
                .with_context(|| format!("Failed to parse seed file: {}", path.display()))?;
            (seed_file.features, seed_file.competitors)
        }
        None => (
            config.taxonomy.features.clone(),
            config.seed.competitors.clone(),
        ),
    };

    let pool = db::connect(config).await?;

    let mut features_created = 0u64;
    let mut features_updated = 0u64;
    for feature in &features {
        let existing: Option<String> = sqlx::query_scalar("SELECT id FROM features WHERE name = ?")
            .bind(&feature.name)
            .fetch_optional(&pool)
            .await?;
        let id = existing.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        sqlx::query(
            r#"
            INSERT INTO features (id, name, category, priority, description)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                category = excluded.category,
                priority = excluded.priority,
                description = excluded.description
            "#,
        )
        .bind(&id)
        .bind(&feature.name)
        .bind(&feature.category)
        .bind(feature.priority.as_str())
        .bind(&feature.description)
        .execute(&pool)
        .await?;
        if existing.is_some() {
            features_updated += 1;
        } else {
            features_created += 1;
        }
    }

    let mut competitors_created = 0u64;
    for competitor in &competitors {
        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM competitors WHERE name = ? COLLATE NOCASE")
                .bind(&competitor.name)
                .fetch_optional(&pool)
                .await?;
        match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE competitors SET region = COALESCE(?, region), website = COALESCE(?, website) WHERE id = ?",
                )
                .bind(competitor.region.map(|r| r.as_str()))
                .bind(&competitor.website)
                .bind(&id)
                .execute(&pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO competitors (id, name, region, website) VALUES (?, ?, ?, ?)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&competitor.name)
                .bind(competitor.region.map(|r| r.as_str()))
                .bind(&competitor.website)
                .execute(&pool)
                .await?;
                competitors_created += 1;
            }
        }
    }

    println!("seed");
    println!(
        "  features: {} created, {} updated",
        features_created, features_updated
    );
    println!("  competitors created: {}", competitors_created);
    println!("ok");

    pool.close().await;
    Ok(())
}
