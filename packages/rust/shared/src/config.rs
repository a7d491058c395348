//! Application configuration for stixfeed.
//!
//! User config lives at `~/.stixfeed/stixfeed.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, StixFeedError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "stixfeed.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".stixfeed";

// ---------------------------------------------------------------------------
// Config structs (matching stixfeed.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote catalog settings.
    #[serde(default)]
    pub catalog: CatalogSection,

    /// Fetch coordinator settings.
    #[serde(default)]
    pub fetch: FetchSection,

    /// Feed-level attributes stamped on every entity.
    #[serde(default)]
    pub feed: FeedSection,

    /// Enrichment policies.
    #[serde(default)]
    pub enrichment: EnrichmentSection,
}

/// `[catalog]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSection {
    /// TAXII discovery URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Objects requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure: bool,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            insecure: false,
        }
    }
}

fn default_base_url() -> String {
    "https://stix2.unit42.org/taxii".into()
}
fn default_api_key_env() -> String {
    "UNIT42_API_KEY".into()
}
fn default_page_size() -> usize {
    100
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[fetch]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchSection {
    /// Maximum concurrent collection fetches. 0 means available parallelism.
    #[serde(default)]
    pub concurrency: usize,
}

/// `[feed]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSection {
    /// Tags added to every entity.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Traffic Light Protocol color attached verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tlp_color: Option<String>,

    /// Value of the `reportedby` field.
    #[serde(default = "default_reported_by")]
    pub reported_by: String,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            tlp_color: None,
            reported_by: default_reported_by(),
        }
    }
}

fn default_reported_by() -> String {
    "Unit42".into()
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentSection {
    /// How report records are split into main and sub-reports.
    #[serde(default)]
    pub partition: PartitionPolicy,

    /// Which external ids label a report's attack-pattern annotation.
    #[serde(default)]
    pub mitre_id: MitreIdPolicy,
}

/// Report partitioning policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionPolicy {
    /// Every non-report member reference of a report files the report as a
    /// sub-report; reports with a nested report member are main reports.
    #[default]
    ReferenceWalk,
    /// Sub-reports are exactly the reports nested inside a main report.
    Strict,
}

/// External-id selection for a report's attack-pattern annotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MitreIdPolicy {
    /// Only the external id of the last url-bearing reference survives.
    #[default]
    Last,
    /// All external ids of url-bearing references, comma-joined.
    All,
}

// ---------------------------------------------------------------------------
// Runtime config (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime catalog client configuration.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// TAXII discovery URL.
    pub base_url: Url,
    /// API key sent as a token, if any.
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Skip TLS certificate verification.
    pub insecure: bool,
}

impl CatalogConfig {
    /// Resolve from the file config, reading the API key from the environment.
    pub fn from_app_config(config: &AppConfig) -> Result<Self> {
        let base_url = Url::parse(&config.catalog.base_url).map_err(|e| {
            StixFeedError::config(format!(
                "invalid catalog base_url '{}': {e}",
                config.catalog.base_url
            ))
        })?;

        let api_key = std::env::var(&config.catalog.api_key_env)
            .ok()
            .filter(|key| !key.is_empty());

        Ok(Self {
            base_url,
            api_key,
            timeout_secs: config.catalog.timeout_secs,
            insecure: config.catalog.insecure,
        })
    }
}

/// Runtime fetch coordinator configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Objects requested per page.
    pub page_size: usize,
    /// Maximum concurrent collection fetches (always at least 1).
    pub concurrency: usize,
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        let concurrency = match config.fetch.concurrency {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        Self {
            page_size: config.catalog.page_size.max(1),
            concurrency,
        }
    }
}

/// Runtime enrichment options.
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// Tags added to every entity.
    pub feed_tags: Vec<String>,
    /// Traffic Light Protocol color.
    pub tlp_color: Option<String>,
    /// Value of the `reportedby` field.
    pub reported_by: String,
    /// Report partitioning policy.
    pub partition: PartitionPolicy,
    /// Attack-pattern external-id policy for reports.
    pub mitre_id: MitreIdPolicy,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for EnrichOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            feed_tags: config.feed.tags.clone(),
            tlp_color: config.feed.tlp_color.clone(),
            reported_by: config.feed.reported_by.clone(),
            partition: config.enrichment.partition,
            mitre_id: config.enrichment.mitre_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.stixfeed/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StixFeedError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.stixfeed/stixfeed.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| StixFeedError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| StixFeedError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| StixFeedError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| StixFeedError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| StixFeedError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
