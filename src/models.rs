//! Core data models used throughout the reconciliation engine.
//!
//! These types represent the competitors, features, matrix cells, and
//! screenshots that flow through the scan → classify → upsert pipeline.
//! Every record crossing a store boundary is one of these explicit types.

use serde::{Deserialize, Serialize};

/// Market region a competitor operates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "TR")]
    Tr,
    #[serde(rename = "Global")]
    Global,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Tr => "TR",
            Region::Global => "Global",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "TR" | "tr" => Some(Region::Tr),
            "Global" | "global" => Some(Region::Global),
            _ => None,
        }
    }
}

/// How well a competitor implements a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    None,
    Basic,
    Good,
    Excellent,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::None => "none",
            Quality::Basic => "basic",
            Quality::Good => "good",
            Quality::Excellent => "excellent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Some(Quality::None),
            "basic" => Some(Quality::Basic),
            "good" => Some(Quality::Good),
            "excellent" => Some(Quality::Excellent),
            _ => None,
        }
    }
}

/// Feature priority from the governed taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            _ => None,
        }
    }
}

/// A tracked competitor (exchange/app).
#[derive(Debug, Clone)]
pub struct Competitor {
    pub id: String,
    pub name: String,
    pub region: Option<Region>,
    pub website: Option<String>,
    pub description: Option<String>,
}

/// A named product capability from the closed taxonomy.
#[derive(Debug, Clone)]
pub struct Feature {
    pub id: String,
    pub name: String,
    pub category: String,
    pub priority: Priority,
    pub description: Option<String>,
}

/// One cell of the competitor ↔ feature matrix.
///
/// Exactly one row exists per (competitor_id, feature_id) pair; all writes
/// go through an upsert keyed on that composite.
#[derive(Debug, Clone)]
pub struct MatrixCell {
    pub id: String,
    pub competitor_id: String,
    pub feature_id: String,
    pub has_feature: bool,
    pub quality: Quality,
    pub notes: Option<String>,
}

/// Which physical table a screenshot row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// Current model: scoped under a competitor with an optional feature pointer.
    Flat,
    /// Legacy model: scoped under a competitor_features relation row.
    Relation,
}

/// A screenshot record, normalized across both physical representations.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub id: String,
    pub competitor_id: String,
    pub feature_id: Option<String>,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub is_onboarding: bool,
    pub upload_source: String,
    pub context: Option<String>,
    pub classify_method: Option<String>,
    pub classify_confidence: Option<f64>,
    pub representation: Representation,
}

/// Input for creating a screenshot record in the current (flat) model.
#[derive(Debug, Clone)]
pub struct NewScreenshot {
    pub competitor_id: String,
    pub feature_id: Option<String>,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub is_onboarding: bool,
    pub upload_source: String,
    pub context: Option<String>,
    pub classify_method: Option<String>,
    pub classify_confidence: Option<f64>,
}

/// A file yielded by the filesystem scanner before classification.
#[derive(Debug, Clone)]
pub struct ScanItem {
    pub competitor_folder: String,
    pub relative_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
}
