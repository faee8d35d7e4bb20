//! Configuration management using the prefer crate.
//!
//! `Config` mirrors the optional config file; `Settings` is the fully
//! resolved runtime view. Resolution order: defaults, then the config file,
//! then environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scrapers::{BrowserEngineConfig, BrowserMode, RetryPolicy, DEFAULT_USER_AGENT};

/// Config file basename discovered by prefer.
pub const CONFIG_NAME: &str = "bulletin-monitor";

const DEFAULT_DATABASE_FILENAME: &str = "bulletins.db";
const RAW_SUBDIR: &str = "raw";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database URL (overrides `data_dir/bulletins.db` when set).
    pub database_url: Option<String>,
    /// Root of the filesystem payload store.
    pub raw_storage_dir: PathBuf,
    /// Object-store endpoint recorded alongside payload URIs.
    pub raw_storage_endpoint: Option<String>,
    /// Bucket name; payload URIs become `s3://bucket/key` when set.
    pub raw_storage_bucket: Option<String>,
    pub verify_tls: bool,
    pub user_agent: String,
    pub browser_mode: BrowserMode,
    pub browser: BrowserEngineConfig,
    /// Static HTML with fewer visible characters escalates to the browser.
    pub min_html_chars: usize,
    /// Politeness floor between requests to one domain.
    pub min_delay: Duration,
    pub ocr_enabled: bool,
    pub ocr_language: String,
    pub ocr_dpi: u32,
    /// PDF pages with fewer non-whitespace characters are OCR'd.
    pub ocr_min_page_chars: usize,
    pub seed_file: PathBuf,
    pub sources_file: PathBuf,
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    pub run_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub max_sitemap_depth: usize,
    pub max_hub_links: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_NAME);

        Self {
            raw_storage_dir: data_dir.join(RAW_SUBDIR),
            data_dir,
            database_url: None,
            raw_storage_endpoint: None,
            raw_storage_bucket: None,
            verify_tls: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            browser_mode: BrowserMode::Auto,
            browser: BrowserEngineConfig::default(),
            min_html_chars: 200,
            min_delay: Duration::from_millis(500),
            ocr_enabled: true,
            ocr_language: "eng".to_string(),
            ocr_dpi: 300,
            ocr_min_page_chars: 120,
            seed_file: PathBuf::from("urls.txt"),
            sources_file: PathBuf::from("sources.yaml"),
            max_concurrency: 8,
            request_timeout: Duration::from_secs(30),
            run_timeout: None,
            retry: RetryPolicy::default(),
            max_sitemap_depth: 2,
            max_hub_links: 200,
        }
    }
}

impl Settings {
    /// Get the database URL, constructing from the data directory if not set.
    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!(
                "sqlite:{}",
                self.data_dir.join(DEFAULT_DATABASE_FILENAME).display()
            ),
        }
    }

    /// Create the data and payload directories.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.raw_storage_dir)?;
        Ok(())
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("DATABASE_URL") {
            tracing::debug!("Using DATABASE_URL from environment: {}", url);
            self.database_url = Some(url);
        }
        if let Some(dir) = get("RAW_STORAGE_DIR") {
            self.raw_storage_dir = PathBuf::from(dir);
        }
        if let Some(endpoint) = get("RAW_STORAGE_ENDPOINT") {
            self.raw_storage_endpoint = Some(endpoint);
        }
        if let Some(bucket) = get("RAW_STORAGE_BUCKET") {
            self.raw_storage_bucket = Some(bucket);
        }
        if let Some(verify) = get("CRAWLER_VERIFY_TLS").and_then(|v| parse_bool(&v)) {
            self.verify_tls = verify;
        }
        if let Some(ua) = get("CRAWLER_USER_AGENT") {
            self.user_agent = ua;
        }
        if let Some(mode) = get("CRAWLER_BROWSER_MODE") {
            match mode.parse() {
                Ok(mode) => self.browser_mode = mode,
                Err(e) => tracing::warn!("Ignoring CRAWLER_BROWSER_MODE: {}", e),
            }
        }
        if let Some(min) = get("CRAWLER_MIN_HTML_CHARS").and_then(|v| v.parse().ok()) {
            self.min_html_chars = min;
        }
        if let Some(secs) = get("CRAWLER_MIN_DELAY").and_then(|v| v.parse::<f64>().ok()) {
            if secs.is_finite() && secs >= 0.0 {
                self.min_delay = Duration::from_secs_f64(secs);
            }
        }
        if let Some(enabled) = get("PDF_OCR_ENABLED").and_then(|v| parse_bool(&v)) {
            self.ocr_enabled = enabled;
        }
        if let Some(path) = get("SEED_FILE") {
            self.seed_file = PathBuf::from(path);
        }
        if let Some(path) = get("SOURCES_FILE") {
            self.sources_file = PathBuf::from(path);
        }
    }
}

/// `1/true/yes/on` and `0/false/no/off`, case-insensitive.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_storage_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_storage_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_tls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_mode: Option<BrowserMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserEngineConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_html_chars: Option<usize>,
    /// Seconds, fractional allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_delay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sitemap_depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hub_links: Option<usize>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover and load a config file, falling back to defaults.
    pub async fn load() -> Self {
        match prefer::load(CONFIG_NAME).await {
            Ok(found) => match found.source_path() {
                Some(path) => Self::load_from_path(path).await.unwrap_or_else(|e| {
                    tracing::warn!("{}", e);
                    Self::default()
                }),
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// The format follows the file extension: TOML, YAML, otherwise JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn parse(contents: &str, ext: &str) -> Result<Self, String> {
        match ext {
            "toml" => {
                toml::from_str(contents).map_err(|e| format!("Failed to parse TOML config: {}", e))
            }
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e)),
            _ => serde_json::from_str(contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e)),
        }
    }

    /// Directory relative paths are resolved against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    fn resolve_path(path: &str, base_dir: &Path) -> PathBuf {
        let path = match path.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(path)),
            None => PathBuf::from(path),
        };
        if path.is_absolute() {
            path
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = Self::resolve_path(data_dir, base_dir);
            settings.raw_storage_dir = settings.data_dir.join(RAW_SUBDIR);
        }
        if let Some(ref url) = self.database_url {
            settings.database_url = Some(url.clone());
        }
        if let Some(ref dir) = self.raw_storage_dir {
            settings.raw_storage_dir = Self::resolve_path(dir, base_dir);
        }
        if let Some(ref bucket) = self.raw_storage_bucket {
            settings.raw_storage_bucket = Some(bucket.clone());
        }
        if let Some(verify) = self.verify_tls {
            settings.verify_tls = verify;
        }
        if let Some(ref ua) = self.user_agent {
            settings.user_agent = ua.clone();
        }
        if let Some(mode) = self.browser_mode {
            settings.browser_mode = mode;
        }
        if let Some(ref browser) = self.browser {
            settings.browser = browser.clone();
        }
        if let Some(min) = self.min_html_chars {
            settings.min_html_chars = min;
        }
        if let Some(secs) = self.min_delay.filter(|s| s.is_finite() && *s >= 0.0) {
            settings.min_delay = Duration::from_secs_f64(secs);
        }
        if let Some(enabled) = self.ocr_enabled {
            settings.ocr_enabled = enabled;
        }
        if let Some(ref lang) = self.ocr_language {
            settings.ocr_language = lang.clone();
        }
        if let Some(ref path) = self.seed_file {
            settings.seed_file = Self::resolve_path(path, base_dir);
        }
        if let Some(ref path) = self.sources_file {
            settings.sources_file = Self::resolve_path(path, base_dir);
        }
        if let Some(n) = self.max_concurrency {
            settings.max_concurrency = n.max(1);
        }
        if let Some(secs) = self.request_timeout {
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.run_timeout {
            settings.run_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(attempts) = self.retry_attempts {
            settings.retry.max_attempts = attempts.max(1);
        }
        if let Some(depth) = self.max_sitemap_depth {
            settings.max_sitemap_depth = depth;
        }
        if let Some(max) = self.max_hub_links {
            settings.max_hub_links = max;
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (--config).
    pub config_path: Option<PathBuf>,
}

/// Load settings: `.env`, then the config file, then environment overrides.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let _ = dotenvy::dotenv();

    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await.unwrap_or_else(|e| {
            tracing::warn!("{}", e);
            Config::default()
        }),
        None => Config::load().await,
    };

    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings, &base_dir);
    settings.apply_env(|name| std::env::var(name).ok());

    (settings, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert!(s.verify_tls);
        assert!(s.ocr_enabled);
        assert_eq!(s.min_delay, Duration::from_millis(500));
        assert_eq!(s.min_html_chars, 200);
        assert_eq!(s.max_concurrency, 8);
        assert_eq!(s.browser_mode, BrowserMode::Auto);
        assert!(s.database_url().starts_with("sqlite:"));
        assert!(s.database_url().ends_with("bulletins.db"));
    }

    #[test]
    fn test_env_overrides() {
        let mut s = Settings::default();
        s.apply_env(env(&[
            ("DATABASE_URL", "sqlite:/tmp/b.db"),
            ("CRAWLER_VERIFY_TLS", "off"),
            ("CRAWLER_BROWSER_MODE", "never-heard-of-it"),
            ("CRAWLER_MIN_DELAY", "1.5"),
            ("PDF_OCR_ENABLED", "0"),
            ("RAW_STORAGE_BUCKET", "bulletins"),
            ("SEED_FILE", "seeds.txt"),
        ]));
        assert_eq!(s.database_url(), "sqlite:/tmp/b.db");
        assert!(!s.verify_tls);
        assert_eq!(s.browser_mode, BrowserMode::Auto);
        assert_eq!(s.min_delay, Duration::from_millis(1500));
        assert!(!s.ocr_enabled);
        assert_eq!(s.raw_storage_bucket.as_deref(), Some("bulletins"));
        assert_eq!(s.seed_file, PathBuf::from("seeds.txt"));
    }

    #[test]
    fn test_unparseable_bool_ignored() {
        let mut s = Settings::default();
        s.apply_env(env(&[("CRAWLER_VERIFY_TLS", "maybe")]));
        assert!(s.verify_tls);
    }

    #[test]
    fn test_toml_config_applies() {
        let config = Config::parse(
            r#"
data_dir = "state"
max_concurrency = 3
browser_mode = "off"
min_delay = 2.0
run_timeout = 600

[browser]
headless = false
"#,
            "toml",
        )
        .unwrap();

        let mut s = Settings::default();
        config.apply_to_settings(&mut s, Path::new("/srv/bulletins"));
        assert_eq!(s.data_dir, PathBuf::from("/srv/bulletins/state"));
        assert_eq!(s.raw_storage_dir, PathBuf::from("/srv/bulletins/state/raw"));
        assert_eq!(s.max_concurrency, 3);
        assert_eq!(s.browser_mode, BrowserMode::Off);
        assert_eq!(s.min_delay, Duration::from_secs(2));
        assert_eq!(s.run_timeout, Some(Duration::from_secs(600)));
        assert!(!s.browser.headless);
    }

    #[test]
    fn test_yaml_and_json_configs() {
        let yaml = Config::parse("verify_tls: false\nmax_hub_links: 50\n", "yml").unwrap();
        assert_eq!(yaml.verify_tls, Some(false));
        assert_eq!(yaml.max_hub_links, Some(50));

        let json = Config::parse(r#"{"user_agent": "agency-watch/1.0"}"#, "json").unwrap();
        assert_eq!(json.user_agent.as_deref(), Some("agency-watch/1.0"));

        assert!(Config::parse("not = [valid", "toml").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("OFF"), Some(false));
        assert_eq!(parse_bool(""), None);
    }
}
