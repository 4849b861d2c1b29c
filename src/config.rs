use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::memory::types::{Scope, Tier};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MnemosConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub retention: RetentionConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub log_level: String,
    pub host: String,
    pub port: u16,
    /// Credential the stdio server acts under. Resolved through [`AuthConfig`].
    /// The HTTP transport ignores it when keys are configured and resolves
    /// each request's bearer key instead.
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `local`, `http` or `hashed`.
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    /// Base URL for the `http` provider (OpenAI-compatible).
    pub api_base: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub default_threshold: f64,
    /// Similarities closer than this are ranked as ties.
    pub tie_epsilon: f64,
    /// 0 disables the default search deadline.
    pub search_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetentionConfig {
    pub short_term_ttl_secs: u64,
    pub medium_term_ttl_secs: u64,
    pub sweep_enabled: bool,
    pub sweep_interval_secs: u64,
    /// Delay before the supervisor restarts a crashed sweeper.
    pub restart_backoff_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub keys: Vec<ApiKeyEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiKeyEntry {
    pub key: String,
    pub caller_id: String,
    pub scope: Scope,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            log_level: "info".into(),
            host: "127.0.0.1".into(),
            port: 8765,
            api_key: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_mnemos_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_mnemos_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            api_base: "https://api.openai.com/v1".into(),
            api_key: None,
            timeout_ms: 10_000,
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 100,
            default_threshold: 0.3,
            tie_epsilon: 1e-6,
            search_timeout_ms: 5_000,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            short_term_ttl_secs: 60 * 60,
            medium_term_ttl_secs: 7 * 24 * 60 * 60,
            sweep_enabled: true,
            sweep_interval_secs: 300,
            restart_backoff_secs: 30,
        }
    }
}

impl RetentionConfig {
    /// Lifetime of a fresh record in `tier`; `None` for long-term.
    pub fn ttl(&self, tier: Tier) -> Option<chrono::Duration> {
        let secs = match tier {
            Tier::ShortTerm => self.short_term_ttl_secs,
            Tier::MediumTerm => self.medium_term_ttl_secs,
            Tier::LongTerm => return None,
        };
        Some(chrono::Duration::seconds(secs as i64))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl RetrievalConfig {
    pub fn search_timeout(&self) -> Option<Duration> {
        (self.search_timeout_ms > 0).then(|| Duration::from_millis(self.search_timeout_ms))
    }
}

/// Returns `~/.mnemos/`
pub fn default_mnemos_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".mnemos")
}

/// Returns the default config file path: `~/.mnemos/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnemos_dir().join("config.toml")
}

impl MnemosConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, apply env var overrides, then validate.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemosConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (MNEMOS_DB, MNEMOS_LOG_LEVEL, MNEMOS_API_KEY, MNEMOS_EMBEDDING_PROVIDER).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMOS_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMOS_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("MNEMOS_API_KEY") {
            self.server.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("MNEMOS_EMBEDDING_PROVIDER") {
            self.embedding.provider = val;
        }
    }

    /// Reject settings that would break store invariants.
    pub fn validate(&self) -> Result<()> {
        if self.retention.short_term_ttl_secs == 0 || self.retention.medium_term_ttl_secs == 0 {
            bail!("retention TTLs must be positive (expires_at must be after created_at)");
        }
        if self.retention.short_term_ttl_secs > self.retention.medium_term_ttl_secs {
            bail!("short_term_ttl_secs must not exceed medium_term_ttl_secs");
        }
        if self.retrieval.default_top_k == 0 || self.retrieval.max_top_k == 0 {
            bail!("retrieval top_k bounds must be positive");
        }
        if self.retrieval.default_top_k > self.retrieval.max_top_k {
            bail!("default_top_k must not exceed max_top_k");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.default_threshold) {
            bail!("default_threshold must be within [-1.0, 1.0]");
        }
        if !(self.retrieval.tie_epsilon > 0.0) {
            bail!("tie_epsilon must be positive");
        }
        if self.embedding.backoff_multiplier < 1.0 {
            bail!("backoff_multiplier must be at least 1.0");
        }
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MnemosConfig::default();
        assert_eq!(config.server.transport, "stdio");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.retrieval.default_top_k, 5);
        assert!(config.storage.db_path.ends_with("memory.db"));
        config.validate().unwrap();
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
db_path = "/tmp/test.db"

[retention]
short_term_ttl_secs = 120

[[auth.keys]]
key = "k-123"
caller_id = "agent-7"
scope = "full"
"#;
        let config: MnemosConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.retention.short_term_ttl_secs, 120);
        assert_eq!(config.auth.keys.len(), 1);
        assert_eq!(config.auth.keys[0].scope, Scope::Full);
        // defaults still apply for unset fields
        assert_eq!(config.retention.medium_term_ttl_secs, 7 * 24 * 60 * 60);
        assert_eq!(config.embedding.max_retries, 3);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = MnemosConfig::default();
        std::env::set_var("MNEMOS_DB", "/tmp/override.db");
        std::env::set_var("MNEMOS_LOG_LEVEL", "trace");
        std::env::set_var("MNEMOS_API_KEY", "secret");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.server.log_level, "trace");
        assert_eq!(config.server.api_key.as_deref(), Some("secret"));

        // Clean up
        std::env::remove_var("MNEMOS_DB");
        std::env::remove_var("MNEMOS_LOG_LEVEL");
        std::env::remove_var("MNEMOS_API_KEY");
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut config = MnemosConfig::default();
        config.retention.short_term_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn ttl_per_tier() {
        let retention = RetentionConfig::default();
        assert_eq!(retention.ttl(Tier::ShortTerm), Some(chrono::Duration::hours(1)));
        assert!(retention.ttl(Tier::LongTerm).is_none());
    }
}
