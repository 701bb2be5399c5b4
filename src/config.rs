//! Configuration file parser for ~/.config/newsreel/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, though we log a warning when the file
//! contains potential typos. `NEWSAPI_KEY` in the environment takes
//! precedence over `api_key` in the file.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::api::{ClientOptions, Selector};
use crate::controller::ControllerSettings;
use crate::storage::{Category, MAX_ARTICLES};
use crate::util::{CONTENT_BUDGET, DESCRIPTION_BUDGET};

/// Environment variable that overrides `api_key`.
pub const API_KEY_ENV: &str = "NEWSAPI_KEY";

/// Largest page size the upstream API accepts.
const MAX_PAGE_SIZE: u32 = 100;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but cannot be used.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
///
/// Custom Debug impl masks `api_key` to prevent secret leakage in logs,
/// error messages, and debug output.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// News API key (alternative to the NEWSAPI_KEY env var).
    pub api_key: Option<String>,

    /// Keyword search endpoint.
    pub search_url: String,

    /// Top-headlines endpoint used for categories.
    pub headlines_url: String,

    /// Two-letter article language.
    pub language: String,

    /// Two-letter country for top headlines.
    pub country: String,

    pub request_timeout_secs: u64,

    /// Articles per page (1..=100).
    pub page_size: u32,

    /// Hard cap on pages fetched per keyword or category.
    pub max_pages: u32,

    pub load_more_delay_ms: u64,
    pub refresh_settle_ms: u64,
    pub retry_backoff_ms: u64,
    pub refresh_attempts: u32,

    /// Keyword searched on first launch, before any search has been cached.
    pub default_keyword: String,

    /// Category shown on first launch.
    pub default_category: Category,

    /// Display budgets, in characters.
    pub description_budget: usize,
    pub content_budget: usize,
}

impl Default for Config {
    fn default() -> Self {
        let settings = ControllerSettings::default();
        let client = ClientOptions::default();
        Self {
            api_key: None,
            search_url: client.search_url,
            headlines_url: client.headlines_url,
            language: client.language,
            country: client.country,
            request_timeout_secs: client.timeout.as_secs(),
            page_size: settings.page_size,
            max_pages: settings.max_pages,
            load_more_delay_ms: millis(settings.load_more_delay),
            refresh_settle_ms: millis(settings.refresh_settle),
            retry_backoff_ms: millis(settings.retry_backoff),
            refresh_attempts: settings.refresh_attempts,
            default_keyword: "ukraine".to_string(),
            default_category: Category::General,
            description_budget: DESCRIPTION_BUDGET,
            content_budget: CONTENT_BUDGET,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Mask api_key in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("search_url", &self.search_url)
            .field("headlines_url", &self.headlines_url)
            .field("language", &self.language)
            .field("country", &self.country)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("page_size", &self.page_size)
            .field("max_pages", &self.max_pages)
            .field("load_more_delay_ms", &self.load_more_delay_ms)
            .field("refresh_settle_ms", &self.refresh_settle_ms)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("refresh_attempts", &self.refresh_attempts)
            .field("default_keyword", &self.default_keyword)
            .field("default_category", &self.default_category)
            .field("description_budget", &self.description_budget)
            .field("content_budget", &self.content_budget)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 16] = [
        "api_key",
        "search_url",
        "headlines_url",
        "language",
        "country",
        "request_timeout_secs",
        "page_size",
        "max_pages",
        "load_more_delay_ms",
        "refresh_settle_ms",
        "retry_backoff_ms",
        "refresh_attempts",
        "default_keyword",
        "default_category",
        "description_budget",
        "content_budget",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        Self::parse(&content).inspect(|config| {
            tracing::info!(
                path = %path.display(),
                page_size = config.page_size,
                default_category = %config.default_category,
                "Loaded configuration"
            );
        })
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.max_pages == 0 {
            return Err(ConfigError::Invalid("max_pages must be at least 1".into()));
        }
        let reachable = self.page_size as usize * self.max_pages as usize;
        if reachable > MAX_ARTICLES {
            return Err(ConfigError::Invalid(format!(
                "page_size * max_pages must not exceed {} articles, got {}",
                MAX_ARTICLES, reachable
            )));
        }
        if self.refresh_attempts == 0 {
            return Err(ConfigError::Invalid(
                "refresh_attempts must be at least 1".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.default_keyword.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_keyword must not be blank".into(),
            ));
        }
        Ok(())
    }

    /// Apply the `NEWSAPI_KEY` environment override.
    pub fn with_env(mut self) -> Self {
        self.override_api_key(std::env::var(API_KEY_ENV).ok());
        self
    }

    /// A non-blank `value` replaces the file's key.
    fn override_api_key(&mut self, value: Option<String>) {
        if let Some(key) = value.filter(|k| !k.trim().is_empty()) {
            tracing::debug!("Using API key from environment");
            self.api_key = Some(key);
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            search_url: self.search_url.clone(),
            headlines_url: self.headlines_url.clone(),
            language: self.language.clone(),
            country: self.country.clone(),
            api_key: self.api_key.clone().map(SecretString::from),
            timeout: Duration::from_secs(self.request_timeout_secs),
            ..ClientOptions::default()
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            page_size: self.page_size,
            max_pages: self.max_pages,
            load_more_delay: Duration::from_millis(self.load_more_delay_ms),
            refresh_settle: Duration::from_millis(self.refresh_settle_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            refresh_attempts: self.refresh_attempts,
            ..ControllerSettings::default()
        }
    }

    pub fn default_search(&self) -> Selector {
        Selector::Search(self.default_keyword.trim().to_string())
    }

    pub fn default_headlines(&self) -> Selector {
        Selector::Category(self.default_category)
    }
}

// ============================================================================
// Tests
// ============================================================================
