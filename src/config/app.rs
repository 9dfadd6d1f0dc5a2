//! Main application configuration
//!
//! This module defines the primary configuration structures for the raceway
//! service, including environment variable and TOML file loading and validation.

use crate::config::matchmaking::MatchmakingSettings;
use crate::config::session::SessionSettings;
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
    pub queue_store: QueueStoreSettings,
    pub ledger: LedgerSettings,
    pub matchmaking: MatchmakingSettings,
    pub session: SessionSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Deployment environment (local, dev, production)
    pub environment: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for the API, websocket and health endpoints
    pub http_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Queue store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStoreSettings {
    /// Redis URL, or `memory://` for an in-process store
    pub url: String,
    /// Pub/sub channel carrying "queue changed" wake-ups
    pub notification_channel: String,
}

/// Match ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// SQLite URL, or `memory://` for an in-process ledger
    pub database_url: String,
    /// Maximum pooled connections
    pub max_connections: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "raceway".to_string(),
            environment: "production".to_string(),
            log_level: "info".to_string(),
            http_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for QueueStoreSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            notification_channel: "matchmaking_channel".to_string(),
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://raceway.db".to_string(),
            max_connections: 5,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(environment) = env::var("ENV") {
            self.service.environment = environment;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(port) = env::var("HTTP_PORT") {
            self.service.http_port = port
                .parse()
                .map_err(|_| anyhow!("Invalid HTTP_PORT value: {}", port))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            self.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Queue store settings
        if let Ok(url) = env::var("REDIS_URL") {
            self.queue_store.url = url;
        }
        if let Ok(channel) = env::var("NOTIFICATION_CHANNEL") {
            self.queue_store.notification_channel = channel;
        }

        // Ledger settings
        if let Ok(url) = env::var("DATABASE_URL") {
            self.ledger.database_url = url;
        }
        if let Ok(max) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.ledger.max_connections = max
                .parse()
                .map_err(|_| anyhow!("Invalid DATABASE_MAX_CONNECTIONS value: {}", max))?;
        }

        // Matchmaking settings
        if let Ok(regions) = env::var("MATCHMAKING_REGIONS") {
            self.matchmaking.regions = regions
                .split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect();
        }
        if let Ok(gap) = env::var("MAX_SKILL_GAP") {
            self.matchmaking.max_skill_gap = gap
                .parse()
                .map_err(|_| anyhow!("Invalid MAX_SKILL_GAP value: {}", gap))?;
        }
        if let Ok(policy) = env::var("LATENCY_POLICY") {
            self.matchmaking.latency_policy = policy.parse().map_err(|e: String| anyhow!(e))?;
        }
        if let Ok(gap) = env::var("MAX_LATENCY_GAP") {
            self.matchmaking.max_latency_gap = gap
                .parse()
                .map_err(|_| anyhow!("Invalid MAX_LATENCY_GAP value: {}", gap))?;
        }

        // Session settings
        if let Ok(tick) = env::var("TICK_INTERVAL_MS") {
            self.session.tick_interval_ms = tick
                .parse()
                .map_err(|_| anyhow!("Invalid TICK_INTERVAL_MS value: {}", tick))?;
        }
        if let Ok(buffer) = env::var("OUTBOUND_BUFFER") {
            self.session.outbound_buffer = buffer
                .parse()
                .map_err(|_| anyhow!("Invalid OUTBOUND_BUFFER value: {}", buffer))?;
        }
        if let Ok(idle) = env::var("SESSION_IDLE_TIMEOUT_SECONDS") {
            self.session.idle_timeout_seconds = idle
                .parse()
                .map_err(|_| anyhow!("Invalid SESSION_IDLE_TIMEOUT_SECONDS value: {}", idle))?;
        }
        if let Ok(reap) = env::var("SESSION_REAP_INTERVAL_SECONDS") {
            self.session.reap_interval_seconds = reap
                .parse()
                .map_err(|_| anyhow!("Invalid SESSION_REAP_INTERVAL_SECONDS value: {}", reap))?;
        }
        if let Ok(trust) = env::var("TRUST_MODEL") {
            self.session.trust_model = trust.parse().map_err(|e: String| anyhow!(e))?;
        }

        Ok(())
    }

    /// Whether this deployment wipes its stores on shutdown
    pub fn is_disposable_environment(&self) -> bool {
        matches!(self.service.environment.as_str(), "local" | "dev")
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get session reap interval as Duration
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.session.reap_interval_seconds)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.http_port == 0 {
        return Err(anyhow!("HTTP port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }

    if config.queue_store.url.is_empty() {
        return Err(anyhow!("Queue store URL cannot be empty"));
    }
    if config.queue_store.notification_channel.is_empty() {
        return Err(anyhow!("Notification channel cannot be empty"));
    }
    if config.ledger.database_url.is_empty() {
        return Err(anyhow!("Ledger database URL cannot be empty"));
    }
    if config.ledger.max_connections == 0 {
        return Err(anyhow!("Ledger max connections must be greater than 0"));
    }

    config.matchmaking.validate()?;
    config.session.validate()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.queue_store.notification_channel, "matchmaking_channel");
        assert!(!config.is_disposable_environment());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = AppConfig::default();
        config.service.log_level = "loud".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [service]
            environment = "dev"
            http_port = 9000

            [matchmaking]
            regions = ["US", "EU"]

            [session]
            trust_model = "server-authoritative"
            "#,
        )
        .unwrap();

        assert_eq!(config.service.http_port, 9000);
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.matchmaking.regions, vec!["US", "EU"]);
        assert_eq!(config.matchmaking.max_skill_gap, 100);
        assert_eq!(
            config.session.trust_model,
            crate::types::TrustModel::ServerAuthoritative
        );
        assert!(config.is_disposable_environment());
        assert!(validate_config(&config).is_ok());
    }
}
