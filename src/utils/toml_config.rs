//! TOML-based configuration for MarketScout
//!
//! This module provides declarative configuration for the server, the session
//! store, the tool gateway providers, the planner and the manager's sufficiency
//! policy via a TOML file (`marketscout.toml`).
//!
//! # Hot Reloading
//!
//! Configuration changes are automatically detected and applied at runtime.
//! Use `ConfigManager` for thread-safe access to the current configuration.
//! Planner and manager settings are read when a run starts, so a reload
//! affects new runs only. Provider and cache settings apply at startup.

use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::types::ProviderKind;

/// Root configuration structure loaded from marketscout.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketScoutConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Tool gateway: providers, cache and retry policy
    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub manager: ManagerConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,
}

// ============= Server Configuration =============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Origins allowed to call the API from a browser
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3001".to_string(),
        "http://localhost:3000".to_string(),
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            cors_origins: default_cors_origins(),
        }
    }
}

// ============= Database Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Local database path, or `:memory:`
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Environment variable for Turso URL (optional cloud config)
    pub turso_url_env: Option<String>,

    /// Environment variable for Turso auth token
    pub turso_token_env: Option<String>,
}

fn default_database_url() -> String {
    "./data/marketscout.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            turso_url_env: None,
            turso_token_env: None,
        }
    }
}

// ============= Tool Configuration =============

/// Which implementation backs a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Live backend when its API key is present, mock otherwise
    #[default]
    Auto,
    Mock,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Environment variable holding the API key (provider default when unset)
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Override the provider base URL (provider default when unset)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-attempt timeout
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_provider_timeout_ms() -> u64 {
    12_000
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            api_key_env: None,
            base_url: None,
            timeout_ms: default_provider_timeout_ms(),
        }
    }
}

impl ProviderConfig {
    pub fn api_key_env(&self, kind: ProviderKind) -> &str {
        self.api_key_env.as_deref().unwrap_or(match kind {
            ProviderKind::Search => "TAVILY_API_KEY",
            ProviderKind::Finance => "ALPHAVANTAGE_API_KEY",
        })
    }

    pub fn base_url(&self, kind: ProviderKind) -> &str {
        self.base_url.as_deref().unwrap_or(match kind {
            ProviderKind::Search => "https://api.tavily.com",
            ProviderKind::Finance => "https://www.alphavantage.co",
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_max_entries() -> usize {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Fraction of the delay randomized in both directions (0.0 disables)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    4_000
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub search: ProviderConfig,

    #[serde(default)]
    pub finance: ProviderConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl ToolsConfig {
    pub fn provider(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::Search => &self.search,
            ProviderKind::Finance => &self.finance,
        }
    }
}

// ============= Planner / Manager Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Ticker used when the prompt names none in parentheses
    #[serde(default = "default_symbol")]
    pub default_symbol: String,
}

fn default_symbol() -> String {
    "MSFT".to_string()
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_symbol: default_symbol(),
        }
    }
}

/// Predicate the Manager applies to worker findings before synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SufficiencyPolicy {
    /// Minimum number of cited news items
    #[serde(default = "default_min_news_results")]
    pub min_news_results: usize,

    /// A finance finding needs a current price or a non-empty history
    #[serde(default = "default_true")]
    pub require_price: bool,

    /// Treat findings flagged low-confidence as insufficient
    #[serde(default)]
    pub reject_low_confidence: bool,
}

fn default_min_news_results() -> usize {
    2
}

fn default_true() -> bool {
    true
}

impl Default for SufficiencyPolicy {
    fn default() -> Self {
        Self {
            min_news_results: default_min_news_results(),
            require_price: true,
            reject_low_confidence: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Re-dispatch an insufficient worker task once
    #[serde(default = "default_true")]
    pub redispatch: bool,

    #[serde(default)]
    pub sufficiency: SufficiencyPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            redispatch: true,
            sufficiency: SufficiencyPolicy::default(),
        }
    }
}

// ============= Session Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// How long a finished session stays in memory before eviction
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Broadcast buffer per session; slower subscribers catch up from the log
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_retention_secs() -> u64 {
    3_600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_event_buffer() -> usize {
    256
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Configuration warnings that don't prevent operation but may indicate issues
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub kind: ConfigWarningKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarningKind {
    MockFallback,
    CacheDisabled,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

impl MarketScoutConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: MarketScoutConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for internal consistency and env var availability
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref env) = self.database.turso_url_env {
            self.validate_env_var(env)?;
        }
        if let Some(ref env) = self.database.turso_token_env {
            self.validate_env_var(env)?;
        }

        for kind in [ProviderKind::Search, ProviderKind::Finance] {
            let provider = self.tools.provider(kind);
            if provider.timeout_ms == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "tools.{}.timeout_ms must be greater than zero",
                    kind
                )));
            }
            if provider.backend == Backend::Live {
                self.validate_env_var(provider.api_key_env(kind))?;
            }
        }

        let retry = &self.tools.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "tools.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::ValidationError(format!(
                "tools.retry.base_delay_ms ({}) exceeds max_delay_ms ({})",
                retry.base_delay_ms, retry.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigError::ValidationError(
                "tools.retry.jitter must be within 0.0..=1.0".to_string(),
            ));
        }

        let symbol = self.planner.default_symbol.trim();
        if symbol.is_empty() || symbol.len() > 6 || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::ValidationError(format!(
                "planner.default_symbol '{}' is not a ticker",
                self.planner.default_symbol
            )));
        }

        if self.sessions.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "sessions.event_buffer must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate configuration and collect warnings for degraded setups
    pub fn validate_with_warnings(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        self.validate()?;

        let mut warnings = Vec::new();

        for kind in [ProviderKind::Search, ProviderKind::Finance] {
            let provider = self.tools.provider(kind);
            let env = provider.api_key_env(kind);
            if provider.backend == Backend::Auto && self.resolve_env(env).is_none() {
                warnings.push(ConfigWarning {
                    kind: ConfigWarningKind::MockFallback,
                    message: format!(
                        "{} is not set; the {} provider will use its offline mock",
                        env, kind
                    ),
                });
            }
        }

        if self.tools.cache.ttl_secs == 0 || self.tools.cache.max_entries == 0 {
            warnings.push(ConfigWarning {
                kind: ConfigWarningKind::CacheDisabled,
                message: "tool cache is disabled (ttl_secs or max_entries is 0)".to_string(),
            });
        }

        Ok(warnings)
    }

    fn validate_env_var(&self, name: &str) -> Result<(), ConfigError> {
        self.resolve_env(name)
            .map(|_| ())
            .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
    }

    /// Resolve an environment variable, treating empty values as unset
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok().filter(|v| !v.is_empty())
    }
}

// ============= Configuration Manager =============

/// Thread-safe configuration holder with hot reload support
pub struct ConfigManager {
    config: Arc<ArcSwap<MarketScoutConfig>>,
    config_path: PathBuf,
    watcher: RwLock<Option<RecommendedWatcher>>,
    reload_tx: Option<mpsc::UnboundedSender<()>>,
}

impl ConfigManager {
    /// Create a new configuration manager and load the initial config
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        // Absolute path for reliable file watching
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let config = MarketScoutConfig::load(&path)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: path,
            watcher: RwLock::new(None),
            reload_tx: None,
        })
    }

    /// Create a config manager directly from a config (no file watching)
    pub fn from_config(config: MarketScoutConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: PathBuf::from("marketscout.toml"),
            watcher: RwLock::new(None),
            reload_tx: None,
        }
    }

    /// Get the current configuration (lockless read)
    pub fn config(&self) -> Arc<MarketScoutConfig> {
        self.config.load_full()
    }

    /// Manually reload the configuration from disk
    pub fn reload(&self) -> Result<(), ConfigError> {
        info!("Reloading configuration from {:?}", self.config_path);

        let new_config = MarketScoutConfig::load(&self.config_path)?;
        self.config.store(Arc::new(new_config));

        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Start watching for configuration file changes
    pub fn start_watching(&mut self) -> Result<(), ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        self.reload_tx = Some(tx.clone());

        let config_path = self.config_path.clone();
        let config_arc = Arc::clone(&self.config);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        // Debounced in the receiver
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    error!("Config watcher error: {:?}", e);
                }
            }
        })?;

        if let Some(parent) = self.config_path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        *self.watcher.write() = Some(watcher);

        tokio::spawn(async move {
            let mut last_reload = std::time::Instant::now();
            let debounce_duration = Duration::from_millis(500);

            while rx.recv().await.is_some() {
                if last_reload.elapsed() < debounce_duration {
                    continue;
                }

                // Let the write finish
                tokio::time::sleep(Duration::from_millis(100)).await;

                match MarketScoutConfig::load(&config_path) {
                    Ok(new_config) => {
                        config_arc.store(Arc::new(new_config));
                        info!("Configuration hot-reloaded successfully");
                        last_reload = std::time::Instant::now();
                    }
                    Err(e) => {
                        warn!(
                            "Failed to hot-reload config: {}. Keeping previous config.",
                            e
                        );
                    }
                }
            }
        });

        info!("Configuration hot-reload watcher started");
        Ok(())
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            config_path: self.config_path.clone(),
            watcher: RwLock::new(None), // Watcher is not cloned
            reload_tx: self.reload_tx.clone(),
        }
    }
}
