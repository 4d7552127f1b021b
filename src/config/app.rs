//! Main application configuration
//!
//! Configuration is read from a TOML file or from environment variables,
//! falls back to defaults for anything unset, and is validated before the
//! service starts.

use crate::config::matchmaking::MatchmakingSettings;
use crate::error::MatchmakingError;
use crate::types::QueueType;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub store: StoreSettings,
    pub matchmaking: MatchmakingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for health check endpoint
    pub health_port: u16,
    /// Serve the health/metrics endpoints
    pub enable_metrics: bool,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Which queue store backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

/// Queue store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub redis_url: String,
    /// Prefix for every key the service writes
    pub key_prefix: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "mmf".to_string(),
            log_level: "info".to_string(),
            health_port: 8080,
            enable_metrics: true,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            key_prefix: "mmf".to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| anyhow!("Invalid {} value: {}", name, raw))
}

fn parse_queue_list(name: &str, raw: &str) -> Result<Vec<QueueType>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<QueueType>()
                .map_err(|e| anyhow!("Invalid {} value: {}", name, e))
        })
        .collect()
}

impl AppConfig {
    /// Load configuration from a TOML file. Missing sections take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.service.log_level = log_level;
        }
        if let Ok(port) = env::var("HEALTH_PORT") {
            config.service.health_port = parse_env("HEALTH_PORT", &port)?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            config.service.shutdown_timeout_seconds =
                parse_env("SHUTDOWN_TIMEOUT_SECONDS", &timeout)?;
        }

        // Store settings
        if let Ok(backend) = env::var("STORE_BACKEND") {
            config.store.backend = match backend.trim().to_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "redis" => StoreBackend::Redis,
                _ => return Err(anyhow!("Invalid STORE_BACKEND value: {}", backend)),
            };
        }
        if let Ok(url) = env::var("REDIS_URL") {
            config.store.redis_url = url;
        }
        if let Ok(prefix) = env::var("REDIS_KEY_PREFIX") {
            config.store.key_prefix = prefix;
        }

        // Matchmaking settings
        let mm = &mut config.matchmaking;
        if let Ok(mode) = env::var("MMR_MODE") {
            mm.mode = mode;
        }
        if let Ok(interval) = env::var("MMR_INTERVAL") {
            mm.crawl_interval_seconds = parse_env("MMR_INTERVAL", &interval)?;
        }
        if let Ok(team_size) = env::var("MMR_TEAM_SIZE") {
            mm.team_size = parse_env("MMR_TEAM_SIZE", &team_size)?;
        }
        if let Ok(threshold) = env::var("MMR_THRESHOLD") {
            mm.quality_threshold = parse_env("MMR_THRESHOLD", &threshold)?;
        }
        if let Ok(range) = env::var("MMR_RANGE") {
            mm.score_range = parse_env("MMR_RANGE", &range)?;
        }
        if let Ok(accept) = env::var("MMR_TIME_TO_ACCEPT") {
            mm.accept_timeout_seconds = parse_env("MMR_TIME_TO_ACCEPT", &accept)?;
        }
        if let Ok(cancel) = env::var("MMR_TIME_TO_CANCEL_MATCH") {
            mm.payment_timeout_seconds = parse_env("MMR_TIME_TO_CANCEL_MATCH", &cancel)?;
        }
        if let Ok(poll) = env::var("MMR_POLL_INTERVAL_MS") {
            mm.poll_interval_ms = parse_env("MMR_POLL_INTERVAL_MS", &poll)?;
        }
        if let Ok(queues) = env::var("MMR_QUEUES") {
            mm.queues = parse_queue_list("MMR_QUEUES", &queues)?;
        }
        if let Ok(queues) = env::var("MMR_QUICK_PAIR_QUEUES") {
            mm.quick_pair_queues = parse_queue_list("MMR_QUICK_PAIR_QUEUES", &queues)?;
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => {
            return Err(MatchmakingError::config(format!(
                "Invalid log level: {}",
                config.service.log_level
            ))
            .into())
        }
    }

    if config.service.shutdown_timeout_seconds == 0 {
        return Err(MatchmakingError::config("Shutdown timeout must be greater than 0").into());
    }

    if config.store.backend == StoreBackend::Redis && config.store.redis_url.is_empty() {
        return Err(MatchmakingError::config("Redis URL cannot be empty").into());
    }

    validate_matchmaking(&config.matchmaking)
}

/// Validate the matchmaking section on its own; the evaluator reuses this at tick entry
pub fn validate_matchmaking(mm: &MatchmakingSettings) -> Result<()> {
    if mm.team_size == 0 {
        return Err(MatchmakingError::config("Team size must be greater than 0").into());
    }
    if !(mm.quality_threshold > 0.0 && mm.quality_threshold <= 1.5) {
        return Err(MatchmakingError::config(format!(
            "Quality threshold must be in (0, 1.5], got {}",
            mm.quality_threshold
        ))
        .into());
    }
    if !(mm.score_range >= 0.0) {
        return Err(MatchmakingError::config("Score range cannot be negative").into());
    }
    if mm.crawl_interval_seconds == 0 || mm.poll_interval_ms == 0 {
        return Err(MatchmakingError::config("Intervals must be greater than 0").into());
    }
    if mm.accept_timeout_seconds == 0
        || mm.payment_timeout_seconds == 0
        || mm.external_call_timeout_seconds == 0
    {
        return Err(MatchmakingError::config("Timeouts must be greater than 0").into());
    }
    if mm.payment_check_every == 0 {
        return Err(MatchmakingError::config("Payment check cadence must be at least 1").into());
    }
    if mm.loosening.initial_tolerance > mm.loosening.max_tolerance {
        return Err(MatchmakingError::config(
            "Initial loosening tolerance cannot exceed the maximum",
        )
        .into());
    }
    Ok(())
}
