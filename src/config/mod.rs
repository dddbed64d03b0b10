use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub favorites: FavoritesConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Upstream site and HTTP client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Prefix for image storage keys. Concatenated verbatim.
    #[serde(default = "default_image_host")]
    pub image_host: String,

    /// Deployment token embedded in every `_next/data` URL.
    #[serde(default = "default_build_id")]
    pub build_id: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub max_retries: usize,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_true")]
    pub auto_refresh_build_id: bool,
}

/// Chapter archive output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Filesystem directory served at `public_base_url`.
    #[serde(default)]
    pub document_root: Option<PathBuf>,

    #[serde(default)]
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FavoritesConfig {
    #[serde(default = "default_favorites_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://comick.io".to_string()
}
fn default_image_host() -> String {
    "https://meo.comick.pictures/".to_string()
}
fn default_build_id() -> String {
    ".5e0373503a1a8a82c913dba8a0de490f2157dd0d".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; comick-scrape)".to_string()
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("downloadChapter")
}
fn default_favorites_path() -> PathBuf {
    PathBuf::from("favorites.json")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    3
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            image_host: default_image_host(),
            build_id: default_build_id(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            accept_invalid_certs: true,
            max_retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            auto_refresh_build_id: true,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            document_root: None,
            public_base_url: None,
        }
    }
}

impl Default for FavoritesConfig {
    fn default() -> Self {
        Self { path: default_favorites_path() }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { concurrency: default_concurrency() }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("COMICK").separator("__"))
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}
