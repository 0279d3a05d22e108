//! Application configuration for Larder.
//!
//! User config lives at `~/.larder/larder.toml`.
//! CLI flags override config file values, which override defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{LarderError, Result};
use crate::types::DEFAULT_CATEGORY;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "larder.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".larder";

/// Default generative endpoint base (Gemini-compatible `generateContent`).
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// ---------------------------------------------------------------------------
// Config structs (matching larder.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub import: ImportSection,

    #[serde(default)]
    pub enrichment: EnrichmentSection,

    #[serde(default)]
    pub pacing: PacingSection,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Path to the catalog database. A leading `~` expands to the home dir.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.larder/larder.db".into()
}

/// `[import]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSection {
    /// Field delimiter of the import file (a single ASCII character).
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Category used for rows with an empty category cell.
    #[serde(default = "default_category")]
    pub default_category: String,
}

impl Default for ImportSection {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            default_category: default_category(),
        }
    }
}

fn default_delimiter() -> String {
    ";".into()
}
fn default_category() -> String {
    DEFAULT_CATEGORY.into()
}

/// One candidate endpoint of the generative service, tried in list order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Model identifier, e.g. `gemini-2.5-flash`.
    pub model: String,
    /// API base URL; the request goes to `{base_url}/models/{model}:generateContent`.
    #[serde(default = "default_base_url")]
    pub base_url: Url,
}

impl EndpointDescriptor {
    pub fn new(model: impl Into<String>, base_url: Url) -> Self {
        Self {
            model: model.into(),
            base_url,
        }
    }

    /// Full `generateContent` URL for this endpoint.
    pub fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.as_str().trim_end_matches('/'),
            self.model
        )
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("valid default base url")
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSection {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Ordered candidate endpoints.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointDescriptor>,

    /// Per-call timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for EnrichmentSection {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            endpoints: default_endpoints(),
            request_timeout_secs: default_request_timeout(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_endpoints() -> Vec<EndpointDescriptor> {
    ["gemini-2.5-flash", "gemini-1.5-flash", "gemini-pro"]
        .into_iter()
        .map(|m| EndpointDescriptor::new(m, default_base_url()))
        .collect()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_temperature() -> f32 {
    0.4
}
fn default_max_output_tokens() -> u32 {
    2048
}

/// `[pacing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingSection {
    /// Minimum ms between two enrichment items (5 requests/min ceiling).
    #[serde(default = "default_item_interval")]
    pub item_interval_ms: u64,

    /// Extra pause after the service reports an exhausted quota.
    #[serde(default = "default_quota_cooldown")]
    pub quota_cooldown_ms: u64,
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            item_interval_ms: default_item_interval(),
            quota_cooldown_ms: default_quota_cooldown(),
        }
    }
}

fn default_item_interval() -> u64 {
    13_000
}
fn default_quota_cooldown() -> u64 {
    15_000
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime import configuration.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub delimiter: u8,
    pub default_category: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            delimiter: b';',
            default_category: DEFAULT_CATEGORY.into(),
        }
    }
}

impl TryFrom<&AppConfig> for ImportConfig {
    type Error = LarderError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            delimiter: parse_delimiter(&config.import.delimiter)?,
            default_category: config.import.default_category.trim().to_string(),
        })
    }
}

/// Parse a delimiter setting: one ASCII character, or `\t` / `tab`.
pub fn parse_delimiter(raw: &str) -> Result<u8> {
    match raw {
        "\\t" | "tab" | "\t" => Ok(b'\t'),
        s if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        other => Err(LarderError::config(format!(
            "delimiter must be a single ASCII character, got {other:?}"
        ))),
    }
}

/// Fixed-interval pacing and quota backoff for enrichment runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    pub item_interval: Duration,
    pub quota_cooldown: Duration,
}

impl PacingConfig {
    /// No pauses at all (tests, offline runs).
    pub fn unpaced() -> Self {
        Self {
            item_interval: Duration::ZERO,
            quota_cooldown: Duration::ZERO,
        }
    }
}

impl From<&AppConfig> for PacingConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            item_interval: Duration::from_millis(config.pacing.item_interval_ms),
            quota_cooldown: Duration::from_millis(config.pacing.quota_cooldown_ms),
        }
    }
}

/// Runtime enrichment configuration, built once and passed by reference.
#[derive(Clone)]
pub struct EnrichmentConfig {
    pub endpoints: Vec<EndpointDescriptor>,
    /// Resolved from the configured env var; `None` means offline synthesis only.
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl fmt::Debug for EnrichmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichmentConfig")
            .field("endpoints", &self.endpoints)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

impl EnrichmentConfig {
    /// Build from the app config, reading the API key from the environment.
    pub fn from_app(config: &AppConfig) -> Self {
        let api_key = std::env::var(&config.enrichment.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty());
        Self {
            endpoints: config.enrichment.endpoints.clone(),
            api_key,
            request_timeout: Duration::from_secs(config.enrichment.request_timeout_secs),
            temperature: config.enrichment.temperature,
            max_output_tokens: config.enrichment.max_output_tokens,
        }
    }

    /// A config that never calls out (offline synthesis only).
    pub fn offline() -> Self {
        Self {
            endpoints: Vec::new(),
            api_key: None,
            request_timeout: Duration::from_secs(default_request_timeout()),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.larder/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| LarderError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.larder/larder.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| LarderError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LarderError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LarderError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LarderError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LarderError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the catalog database path, expanding a leading `~`.
pub fn resolve_db_path(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| LarderError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("db_path"));
        assert!(toml_str.contains("GEMINI_API_KEY"));
        assert!(toml_str.contains("gemini-2.5-flash"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pacing.item_interval_ms, 13_000);
        assert_eq!(parsed.enrichment.endpoints.len(), 3);
        assert_eq!(parsed.import.delimiter, ";");
    }

    #[test]
    fn config_with_custom_endpoints() {
        let toml_str = r#"
[import]
delimiter = ","

[[enrichment.endpoints]]
model = "local-model"
base_url = "http://127.0.0.1:8080/v1"

[[enrichment.endpoints]]
model = "gemini-1.5-flash"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.enrichment.endpoints.len(), 2);
        assert_eq!(
            config.enrichment.endpoints[0].generate_url(),
            "http://127.0.0.1:8080/v1/models/local-model:generateContent"
        );
        assert!(
            config.enrichment.endpoints[1]
                .generate_url()
                .starts_with("https://generativelanguage.googleapis.com/v1beta/models/")
        );

        let import = ImportConfig::try_from(&config).expect("import config");
        assert_eq!(import.delimiter, b',');
        assert_eq!(import.default_category, "Uncategorized");
    }

    #[test]
    fn delimiter_parsing() {
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert_eq!(parse_delimiter("tab").unwrap(), b'\t');
        assert_eq!(parse_delimiter("\\t").unwrap(), b'\t');
        assert!(parse_delimiter(";;").is_err());
        assert!(parse_delimiter("").is_err());
    }

    #[test]
    fn pacing_config_from_app_config() {
        let app = AppConfig::default();
        let pacing = PacingConfig::from(&app);
        assert_eq!(pacing.item_interval, Duration::from_secs(13));
        assert_eq!(pacing.quota_cooldown, Duration::from_secs(15));
    }

    #[test]
    fn enrichment_config_without_key_is_offline() {
        let mut app = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        app.enrichment.api_key_env = "LARDER_TEST_NONEXISTENT_KEY_12345".into();
        let config = EnrichmentConfig::from_app(&app);
        assert!(config.api_key.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(!format!("{config:?}").contains("LARDER_TEST"));
    }

    #[test]
    fn db_path_expansion() {
        let p = resolve_db_path("/tmp/catalog.db").unwrap();
        assert_eq!(p, PathBuf::from("/tmp/catalog.db"));
        let home = resolve_db_path("~/.larder/larder.db").unwrap();
        assert!(home.ends_with(".larder/larder.db"));
    }
}
