//! Bulk matrix import.
//!
//! Consumes pre-parsed matrix rows (competitor, region, feature → raw
//! cell value). Spreadsheet parsing itself happens upstream; this module
//! owns the cell-value interpretation and the upserts. Unknown feature
//! columns and unrecognized cell values are logged for manual review,
//! never guessed at.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::matrix::{interpret_cell, CellMark, CellPatch, MatrixStore};
use crate::models::Region;
use crate::resolve::EntityResolver;

/// One imported row: competitor name, region, and a map of feature name
/// to the raw spreadsheet cell value. The trailing coverage column from
/// the source sheet is ignored; coverage is recomputed locally.
#[derive(Debug, Deserialize)]
pub struct MatrixRow {
    pub competitor: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    pub cells: BTreeMap<String, String>,
}

pub async fn run_import(config: &Config, file: &Path, dry_run: bool, reset: bool) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read import file: {}", file.display()))?;
    let rows: Vec<MatrixRow> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse import file: {}", file.display()))?;

    let pool = db::connect(config).await?;
    let resolver = EntityResolver::new(&pool, &config.aliases);
    let matrix = MatrixStore::new(pool.clone());

    let mut competitors_created = 0u64;
    let mut cells_set = 0u64;
    let mut unknown_features = 0u64;
    let mut unrecognized_values = 0u64;

    for row in &rows {
        let competitor = resolver.resolve_competitor(&row.competitor, dry_run).await?;
        if competitor.created {
            competitors_created += 1;
            if dry_run {
                println!("dry-run: would create competitor '{}'", competitor.name);
            }
        }

        if let Some(competitor_id) = &competitor.id {
            if !dry_run {
                if let Some(region) = row.region.as_deref().and_then(Region::parse) {
                    sqlx::query("UPDATE competitors SET region = ? WHERE id = ?")
                        .bind(region.as_str())
                        .bind(competitor_id)
                        .execute(&pool)
                        .await?;
                }
                if let Some(website) = &row.website {
                    sqlx::query("UPDATE competitors SET website = ? WHERE id = ?")
                        .bind(website)
                        .bind(competitor_id)
                        .execute(&pool)
                        .await?;
                }
                if reset {
                    matrix.reset_competitor(competitor_id).await?;
                }
            } else if reset {
                println!(
                    "dry-run: would reset matrix row for '{}'",
                    competitor.name
                );
            }
        }

        for (feature_label, raw) in &row.cells {
            let feature = match resolver.resolve_feature(feature_label).await? {
                Some(feature) => feature,
                None => {
                    println!(
                        "  unknown feature column '{}' (closed list); skipped",
                        feature_label
                    );
                    unknown_features += 1;
                    continue;
                }
            };

            match interpret_cell(raw) {
                CellMark::Yes => {
                    cells_set += 1;
                    match (&competitor.id, dry_run) {
                        (Some(competitor_id), false) => {
                            matrix
                                .upsert_cell(
                                    competitor_id,
                                    &feature.0,
                                    CellPatch {
                                        has_feature: Some(true),
                                        ..CellPatch::default()
                                    },
                                )
                                .await?;
                        }
                        _ => {
                            println!(
                                "dry-run: would upsert cell ({}, {}) has_feature=true",
                                competitor.name, feature.1
                            );
                        }
                    }
                }
                CellMark::No => {}
                CellMark::Unrecognized => {
                    // Treated as "no", but surfaced so a human can fix
                    // the sheet.
                    println!(
                        "  unrecognized cell value '{}' for ({}, {}); treated as no",
                        raw, competitor.name, feature.1
                    );
                    unrecognized_values += 1;
                }
            }
        }

        if let (Some(competitor_id), false) = (&competitor.id, dry_run) {
            matrix
                .recompute_coverage(competitor_id, &config.taxonomy.industry)
                .await?;
        }
    }

    if dry_run {
        println!("import {} (dry-run)", file.display());
    } else {
        println!("import {}", file.display());
    }
    println!("  rows: {}", rows.len());
    println!("  competitors created: {}", competitors_created);
    println!("  cells set: {}", cells_set);
    println!("  unknown feature columns: {}", unknown_features);
    println!("  unrecognized cell values: {}", unrecognized_values);
    println!("ok");

    pool.close().await;
    Ok(())
}
