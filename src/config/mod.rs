//! Configuration management for the ingestion pipeline
//!
//! Loads a TOML file, applies `CANNECT_SECTION__KEY` environment overrides and
//! validates the result before anything touches the firehose.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Current configuration schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub classifier: ClassifierConfig,
    pub verifier: VerifierConfig,
    pub ingest: IngestConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Content store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    pub pool_size: u32,
}

impl StorageConfig {
    /// Full path of the SQLite database, with `~` expanded
    pub fn database_path(&self) -> PathBuf {
        expand_tilde(&self.data_dir).join(&self.database_file)
    }
}

impl VerifierConfig {
    /// Minimum spacing between AI calls
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}

/// Heuristic classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Handle suffixes whose posts are always kept (e.g. ".cannect.space")
    pub trusted_suffixes: Vec<String>,
    /// Domain-relevant terms
    pub allow_keywords: Vec<String>,
    /// Clearly irrelevant or spam terms
    pub deny_keywords: Vec<String>,
    /// Allow-list hits needed to include without escalation
    pub allow_threshold: u32,
}

/// AI verifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    pub enabled: bool,
    /// OpenAI-compatible chat-completions URL
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub quality_threshold: i64,
    pub min_delay_ms: u64,
    pub request_timeout: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_text_chars: usize,
    /// Stop calling the service once this many tokens were spent since the last reset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<u64>,
    pub usage_reset_interval: String,
    /// USD per million prompt tokens, for cost reporting
    pub prompt_cost_per_mtok: f64,
    /// USD per million completion tokens, for cost reporting
    pub completion_cost_per_mtok: f64,
}

/// Ingestion loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub buffer_size: usize,
    pub milestone_every: u64,
    pub report_interval: String,
    pub shutdown_grace: String,
    /// Repositories hosted in the operator's own namespace
    pub operator_dids: Vec<String>,
    /// Handle used for operator repositories when checking trusted suffixes
    pub operator_handle: String,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IngestError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| IngestError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| IngestError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: CANNECT_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("CANNECT_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "VERIFIER__ENABLED" => {
                self.verifier.enabled = parse_env(path, value)?;
            }
            "VERIFIER__ENDPOINT" => {
                self.verifier.endpoint = value.to_string();
            }
            "VERIFIER__MODEL" => {
                self.verifier.model = value.to_string();
            }
            "VERIFIER__QUALITY_THRESHOLD" => {
                self.verifier.quality_threshold = parse_env(path, value)?;
            }
            "VERIFIER__MIN_DELAY_MS" => {
                self.verifier.min_delay_ms = parse_env(path, value)?;
            }
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "INGEST__MILESTONE_EVERY" => {
                self.ingest.milestone_every = parse_env(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| IngestError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("cannect-ingest").join("config.toml"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| IngestError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse a duration string such as "100ms", "30s", "10m" or "24h".
/// A bare number is read as seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();

    // "ms" before "s" because "ms" ends with "s"
    if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse().ok().map(Duration::from_millis)
    } else if let Some(secs) = value.strip_suffix('s') {
        secs.trim().parse().ok().map(Duration::from_secs)
    } else if let Some(mins) = value.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = value.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        value.parse().ok().map(Duration::from_secs)
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.cannect"),
                database_file: "posts.sqlite".to_string(),
                pool_size: 8,
            },
            classifier: ClassifierConfig {
                trusted_suffixes: vec![".cannect.space".to_string()],
                allow_keywords: default_allow_keywords(),
                deny_keywords: default_deny_keywords(),
                allow_threshold: 1,
            },
            verifier: VerifierConfig {
                enabled: false,
                endpoint: "https://api.deepseek.com/chat/completions".to_string(),
                model: "deepseek-chat".to_string(),
                api_key_env: "DEEPSEEK_API_KEY".to_string(),
                quality_threshold: 5,
                min_delay_ms: 100,
                request_timeout: "30s".to_string(),
                temperature: 0.1,
                max_tokens: 200,
                max_text_chars: 2000,
                token_budget: None,
                usage_reset_interval: "24h".to_string(),
                prompt_cost_per_mtok: 0.27,
                completion_cost_per_mtok: 1.10,
            },
            ingest: IngestConfig {
                buffer_size: 1000,
                milestone_every: 100,
                report_interval: "60s".to_string(),
                shutdown_grace: "10s".to_string(),
                operator_dids: Vec::new(),
                operator_handle: "member.cannect.space".to_string(),
            },
        }
    }
}

fn default_allow_keywords() -> Vec<String> {
    [
        "cannabis",
        "marijuana",
        "dispensary",
        "dispensaries",
        "thc",
        "cbd",
        "strain",
        "strains",
        "edibles",
        "pre-roll",
        "prerolls",
        "terpenes",
        "indica",
        "sativa",
        "cultivar",
        "budtender",
        "hemp",
        "420",
        "weed",
        "growers",
        "homegrow",
        "rosin",
        "medical marijuana",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_deny_keywords() -> Vec<String> {
    [
        "crypto",
        "nft",
        "airdrop",
        "giveaway",
        "onlyfans",
        "forex",
        "casino",
        "betting",
        "follow for follow",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
