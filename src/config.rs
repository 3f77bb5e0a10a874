use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::{Priority, Region};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub scan: ScanConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default = "default_aliases")]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_rate_limit_wait_secs")]
    pub rate_limit_wait_secs: u64,
    #[serde(default = "default_size_tolerance_bytes")]
    pub size_tolerance_bytes: i64,
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
    #[serde(default = "default_remote_list_limit")]
    pub list_limit: u32,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    4
}
fn default_min_delay_ms() -> u64 {
    500
}
fn default_rate_limit_wait_secs() -> u64 {
    15
}
fn default_size_tolerance_bytes() -> i64 {
    2048
}
fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("./data/push-progress.json")
}
fn default_remote_list_limit() -> u32 {
    5000
}

/// The closed feature taxonomy, in declaration order.
///
/// Declaration order doubles as classifier precedence: when a path matches
/// keywords for two features at the same tier, the feature declared first
/// wins. Reordering this table changes reclassification results.
#[derive(Debug, Deserialize, Clone)]
pub struct TaxonomyConfig {
    #[serde(default = "default_industry")]
    pub industry: String,
    #[serde(default = "default_features")]
    pub features: Vec<FeatureSpec>,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            industry: default_industry(),
            features: default_features(),
        }
    }
}

fn default_industry() -> String {
    "Crypto exchange".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeatureSpec {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SeedConfig {
    #[serde(default)]
    pub competitors: Vec<SeedCompetitor>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedCompetitor {
    pub name: String,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default)]
    pub website: Option<String>,
}

fn default_aliases() -> BTreeMap<String, String> {
    let pairs = [
        ("BTC Turk", "BTCTurk"),
        ("BTCTurk Pro", "BTCTurk"),
        ("Binance Turkey", "Binance TR"),
        ("CoinTR Pro", "CoinTR"),
        ("Garanti Kripto", "Garanti BBVA Kripto"),
        ("OKX Turkey", "OKX TR"),
    ];
    pairs
        .iter()
        .map(|(a, c)| (a.to_string(), c.to_string()))
        .collect()
}

fn spec(name: &str, category: &str, priority: Priority, keywords: &[&str]) -> FeatureSpec {
    FeatureSpec {
        name: name.to_string(),
        category: category.to_string(),
        priority,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        description: None,
    }
}

fn default_features() -> Vec<FeatureSpec> {
    use Priority::{Critical, High, Medium};
    vec![
        spec(
            "Sign up with Bank",
            "onboarding",
            Critical,
            &["onboarding", "sign up", "signup", "register", "kyc", "account opening"],
        ),
        spec(
            "Mobile App",
            "platform",
            Critical,
            &["mobile", "app store", "android", "ios"],
        ),
        spec(
            "Fiat Deposit",
            "payments",
            Critical,
            &["fiat", "deposit", "bank transfer", "papara"],
        ),
        spec(
            "Crypto Withdrawal",
            "payments",
            High,
            &["withdraw", "withdrawal"],
        ),
        spec(
            "Spot Trading",
            "trading",
            Critical,
            &["spot", "trade", "trading", "order book", "orderbook"],
        ),
        spec(
            "Futures Trading",
            "trading",
            High,
            &["futures", "leverage", "margin", "perpetual"],
        ),
        spec("Staking", "earn", High, &["staking", "stake", "earn", "apy"]),
        spec(
            "Recurring Buy",
            "trading",
            Medium,
            &["recurring", "dca", "auto invest", "autoinvest"],
        ),
        spec(
            "Price Alerts",
            "engagement",
            Medium,
            &["price alert", "alert", "alarm", "notification"],
        ),
        spec(
            "Copy Trading",
            "trading",
            Medium,
            &["copy trading", "social trading", "copy"],
        ),
        spec(
            "Referral Program",
            "engagement",
            Medium,
            &["referral", "invite", "refer a friend"],
        ),
        spec(
            "Dark Mode",
            "platform",
            Medium,
            &["dark mode", "dark theme", "theme"],
        ),
        spec(
            "Two Factor Authentication",
            "security",
            High,
            &["2fa", "two factor", "authenticator", "security"],
        ),
        spec(
            "Customer Support Chat",
            "engagement",
            Medium,
            &["live chat", "support", "helpdesk"],
        ),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate taxonomy
    if config.taxonomy.features.is_empty() {
        anyhow::bail!("taxonomy.features must not be empty");
    }
    let mut seen = std::collections::HashSet::new();
    for feature in &config.taxonomy.features {
        if feature.name.trim().is_empty() {
            anyhow::bail!("taxonomy feature with empty name");
        }
        if !seen.insert(feature.name.trim().to_lowercase()) {
            anyhow::bail!("duplicate taxonomy feature: '{}'", feature.name);
        }
    }

    // Validate aliases
    for (alias, canonical) in &config.aliases {
        if alias.trim().is_empty() || canonical.trim().is_empty() {
            anyhow::bail!("alias entries must not be empty");
        }
    }

    // Validate remote
    if let Some(remote) = &config.remote {
        if !remote.base_url.starts_with("http://") && !remote.base_url.starts_with("https://") {
            anyhow::bail!("remote.base_url must be an http(s) URL");
        }
        if remote.max_attempts == 0 || remote.max_attempts > 10 {
            anyhow::bail!("remote.max_attempts must be in 1..=10");
        }
        if remote.timeout_secs == 0 {
            anyhow::bail!("remote.timeout_secs must be > 0");
        }
        if remote.size_tolerance_bytes < 0 {
            anyhow::bail!("remote.size_tolerance_bytes must be >= 0");
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
[db]
path = "./data/shotsync.sqlite"

[scan]
root = "./screenshots"
"#
        .to_string()
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: Config = toml::from_str(&base_toml()).unwrap();
        assert!(!config.taxonomy.features.is_empty());
        assert!(config.aliases.contains_key("BTC Turk"));
        assert!(config.remote.is_none());
    }

    #[test]
    fn test_default_taxonomy_names_unique() {
        let features = default_features();
        let mut seen = std::collections::HashSet::new();
        for f in &features {
            assert!(seen.insert(f.name.to_lowercase()), "duplicate: {}", f.name);
        }
    }

    #[test]
    fn test_remote_defaults() {
        let toml_str = format!(
            "{}\n[remote]\nbase_url = \"https://matrix.example.com/api\"\n",
            base_toml()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        let remote = config.remote.unwrap();
        assert_eq!(remote.timeout_secs, 30);
        assert_eq!(remote.max_attempts, 4);
        assert_eq!(remote.min_delay_ms, 500);
        assert_eq!(remote.size_tolerance_bytes, 2048);
    }

    #[test]
    fn test_taxonomy_priority_parses() {
        let toml_str = format!(
            r#"{}
[taxonomy]
[[taxonomy.features]]
name = "Staking"
category = "earn"
priority = "high"
keywords = ["staking"]
"#,
            base_toml()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.taxonomy.features.len(), 1);
        assert_eq!(config.taxonomy.features[0].priority, Priority::High);
    }
}
