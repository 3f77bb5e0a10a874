use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::models::ScanItem;

/// Maps recognized screenshot extensions to their MIME type; anything
/// else is not scanned.
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// Walk the scan root and yield every recognized image file.
///
/// The layout consumed is `root/<CompetitorFolder>/[subfolder/]<file>`;
/// files sitting directly at the root have no competitor folder and are
/// not yielded. Dotfiles and dot-directories are skipped.
pub fn scan_root(config: &ScanConfig) -> Result<Vec<ScanItem>> {
    let root = &config.root;
    if !root.exists() {
        bail!("scan root does not exist: {}", root.display());
    }

    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut items = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        let components: Vec<&str> = rel_str.split('/').filter(|c| !c.is_empty()).collect();
        if components.len() < 2 {
            continue;
        }
        if components.iter().any(|c| c.starts_with('.')) {
            continue;
        }
        if exclude_set.is_match(&rel_str) {
            continue;
        }

        let file_name = components[components.len() - 1].to_string();
        let ext = match file_name.rsplit_once('.') {
            Some((_, ext)) => ext,
            None => continue,
        };
        let mime_type = match mime_for_extension(ext) {
            Some(mime) => mime.to_string(),
            None => continue,
        };

        let file_size = entry.metadata()?.len() as i64;

        items.push(ScanItem {
            competitor_folder: components[0].to_string(),
            relative_path: rel_str,
            file_name,
            file_size,
            mime_type,
        });
    }

    // Sort for deterministic ordering
    items.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    Ok(items)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
