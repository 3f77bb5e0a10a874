//! Path-based screenshot classifier.
//!
//! Guesses which feature a screenshot documents from its relative path and
//! file name alone. No I/O: the classifier is a pure function over the
//! ordered keyword table from `[[taxonomy.features]]`, so reclassification
//! runs are deterministic.
//!
//! Matching runs in three tiers, first hit wins:
//!
//! 1. `folder-exact` — a path segment equals a feature name.
//! 2. `folder-partial` — a path segment contains, or is contained by, one
//!    of a feature's keywords.
//! 3. `filename-keyword` — the same keyword test against the file stem.
//!
//! Within a tier, features are tried in taxonomy declaration order and the
//! first declared feature wins. The top-level path segment names the
//! competitor and is never a feature candidate. No match means no guess:
//! the caller must leave the screenshot unassigned and surface it for
//! manual review instead of defaulting to some feature.

use crate::config::FeatureSpec;

/// Confidence tier of a classification, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    FolderExact,
    FolderPartial,
    FilenameKeyword,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::FolderExact => "folder-exact",
            Tier::FolderPartial => "folder-partial",
            Tier::FilenameKeyword => "filename-keyword",
        }
    }

    /// Numeric confidence stored alongside the method tag.
    pub fn confidence(&self) -> f64 {
        match self {
            Tier::FolderExact => 1.0,
            Tier::FolderPartial => 0.7,
            Tier::FilenameKeyword => 0.4,
        }
    }
}

/// A successful feature guess.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub feature: String,
    pub tier: Tier,
}

/// Lowercase, `-`/`_` to spaces, whitespace collapsed.
fn normalize(s: &str) -> String {
    let replaced: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == '_' { ' ' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn keyword_hit(segment: &str, keyword: &str) -> bool {
    segment.contains(keyword) || keyword.contains(segment)
}

/// Classify a screenshot from its path relative to the scan root.
///
/// `relative_path` starts with the competitor folder; that segment and the
/// trailing file name are excluded from the folder tiers.
pub fn classify(
    relative_path: &str,
    file_name: &str,
    table: &[FeatureSpec],
) -> Option<Classification> {
    let normalized_path = relative_path.replace('\\', "/");
    let mut segments: Vec<String> = normalized_path
        .split('/')
        .map(normalize)
        .filter(|s| !s.is_empty())
        .collect();
    // Drop the file name itself, then the competitor folder.
    segments.pop();
    if !segments.is_empty() {
        segments.remove(0);
    }

    // Tier 1: a folder equals a feature name.
    for spec in table {
        let name = normalize(&spec.name);
        if segments.iter().any(|s| *s == name) {
            return Some(Classification {
                feature: spec.name.clone(),
                tier: Tier::FolderExact,
            });
        }
    }

    // Tier 2: a folder matches a keyword.
    for spec in table {
        for keyword in &spec.keywords {
            let keyword = normalize(keyword);
            if keyword.is_empty() {
                continue;
            }
            if segments.iter().any(|s| keyword_hit(s, &keyword)) {
                return Some(Classification {
                    feature: spec.name.clone(),
                    tier: Tier::FolderPartial,
                });
            }
        }
    }

    // Tier 3: the file stem matches a keyword.
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);
    let stem = normalize(stem);
    if !stem.is_empty() {
        for spec in table {
            for keyword in &spec.keywords {
                let keyword = normalize(keyword);
                if !keyword.is_empty() && keyword_hit(&stem, &keyword) {
                    return Some(Classification {
                        feature: spec.name.clone(),
                        tier: Tier::FilenameKeyword,
                    });
                }
            }
        }
    }

    None
}
