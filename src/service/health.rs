//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the raceway service,
//! including readiness and liveness probes and a dependency-only check used
//! by the `--health-check` flag.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Fold a component status into an overall one
    fn combine(self, component: HealthStatus) -> HealthStatus {
        match (self, component) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

impl ComponentCheck {
    fn from_probe(name: &str, start: Instant, probe: Result<()>) -> Self {
        let (status, message) = match probe {
            Ok(()) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("{} health check failed: {}", name, e);
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
        };

        Self {
            name: name.to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub uptime_seconds: u64,
    /// Entries currently queued across every region and tier
    pub players_waiting: usize,
    pub passes_run: u64,
    pub matches_created: u64,
    pub commit_failures: u64,
    /// Live game sessions
    pub active_sessions: usize,
    /// Open real-time connections
    pub connections: usize,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let mut checks = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        let service_check = Self::check_service_running(&app_state).await;
        overall_status = overall_status.combine(service_check.status);
        checks.push(service_check);

        for check in Self::check_dependencies(&app_state).await {
            overall_status = overall_status.combine(check.status);
            checks.push(check);
        }

        let matchmaker_check = Self::check_matchmaker(&app_state);
        overall_status = overall_status.combine(matchmaker_check.status);
        checks.push(matchmaker_check);

        let hub_check = Self::check_session_hub(&app_state).await;
        overall_status = overall_status.combine(hub_check.status);
        checks.push(hub_check);

        let stats = Self::gather_service_stats(&app_state).await;

        Ok(HealthCheck {
            status: overall_status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let status = Self::dependency_status(&app_state).await;
        Ok(status.combine(Self::check_matchmaker(&app_state).status))
    }

    /// Probe only the queue store and ledger, without requiring a running service
    pub async fn dependency_status(app_state: &AppState) -> HealthStatus {
        Self::check_dependencies(app_state)
            .await
            .iter()
            .fold(HealthStatus::Healthy, |status, check| status.combine(check.status))
    }

    async fn check_dependencies(app_state: &AppState) -> Vec<ComponentCheck> {
        let start = Instant::now();
        let store_probe = app_state.scheduler().players_waiting().await.map(|_| ());
        let store_check = ComponentCheck::from_probe("queue_store", start, store_probe);

        let start = Instant::now();
        let ledger_check = ComponentCheck::from_probe("ledger", start, app_state.ledger().ping().await);

        vec![store_check, ledger_check]
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Without a subscribed listener joins are accepted but never paired
    fn check_matchmaker(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if app_state.scheduler().is_listening() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Matchmaker is not subscribed to notifications".to_string()),
            )
        };

        ComponentCheck {
            name: "matchmaker".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// A closed hub means broadcasts can no longer reach anybody
    async fn check_session_hub(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match app_state.hub().stats().await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => (HealthStatus::Degraded, Some(e.to_string())),
        };

        ComponentCheck {
            name: "session_hub".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let mut stats = ServiceStats {
            uptime_seconds: app_state.uptime().as_secs(),
            active_sessions: app_state.registry().len(),
            ..Default::default()
        };

        match app_state.scheduler().players_waiting().await {
            Ok(waiting) => stats.players_waiting = waiting,
            Err(e) => debug!("Failed to count waiting players for health check: {}", e),
        }

        if let Ok(scheduler_stats) = app_state.scheduler().get_stats() {
            stats.passes_run = scheduler_stats.passes_run;
            stats.matches_created = scheduler_stats.matches_created;
            stats.commit_failures = scheduler_stats.commit_failures;
        }

        if let Ok(hub_stats) = app_state.hub().stats().await {
            stats.connections = hub_stats.connections;
        }

        stats
    }
}

/// Convert health check to JSON string
impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
