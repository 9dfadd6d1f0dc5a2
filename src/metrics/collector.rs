//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the raceway matchmaking and
//! session service using Prometheus metrics.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use std::time::Duration;

/// Main metrics collector for the service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue and join metrics
    queue_metrics: QueueMetrics,

    /// Scheduler and match metrics
    match_metrics: MatchMetrics,

    /// Game session and connection metrics
    session_metrics: SessionMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Queue-related metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Join requests by outcome (queued, rejected, unavailable)
    pub join_requests_total: IntCounterVec,

    /// Players currently waiting across all queues
    pub players_waiting: IntGauge,

    /// Queue entries skipped because they failed to deserialize
    pub entries_skipped_total: IntCounter,
}

/// Scheduler and match metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Matches committed, by region
    pub matches_created_total: IntCounterVec,

    /// Pairs left queued because the ledger commit failed
    pub commit_failures_total: IntCounter,

    /// Duration of one full scheduler pass
    pub pass_duration_seconds: Histogram,

    /// Matches produced per pass
    pub matches_per_pass: Histogram,
}

/// Game session metrics
#[derive(Clone)]
pub struct SessionMetrics {
    /// Live game sessions
    pub active_sessions: IntGauge,

    /// Sessions reaped after going idle
    pub sessions_reaped_total: IntCounter,

    /// Registered connections
    pub active_connections: IntGauge,

    /// Connections removed, by reason (closed, unresponsive)
    pub connections_dropped_total: IntCounterVec,

    /// Ticks run across all sessions
    pub ticks_total: IntCounter,

    /// Inputs received, by outcome (applied, ignored, malformed)
    pub inputs_total: IntCounterVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let session_metrics = SessionMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            match_metrics,
            session_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn session(&self) -> &SessionMetrics {
        &self.session_metrics
    }

    /// Record a join request and its outcome
    pub fn record_join_request(&self, outcome: &str) {
        self.queue_metrics
            .join_requests_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_skipped_entry(&self) {
        self.queue_metrics.entries_skipped_total.inc();
    }

    pub fn set_players_waiting(&self, count: usize) {
        self.queue_metrics.players_waiting.set(count as i64);
    }

    /// Record a completed scheduler pass
    pub fn record_scheduler_pass(&self, duration: Duration, matches: usize) {
        self.match_metrics
            .pass_duration_seconds
            .observe(duration.as_secs_f64());
        self.match_metrics.matches_per_pass.observe(matches as f64);
    }

    pub fn record_match_created(&self, region: &str) {
        self.match_metrics
            .matches_created_total
            .with_label_values(&[region])
            .inc();
    }

    pub fn record_commit_failure(&self) {
        self.match_metrics.commit_failures_total.inc();
    }

    pub fn record_session_created(&self) {
        self.session_metrics.active_sessions.inc();
    }

    /// Record a session stopped outside the reaper (replacement, shutdown)
    pub fn record_session_stopped(&self) {
        self.session_metrics.active_sessions.dec();
    }

    /// Record a session removed by the idle reaper
    pub fn record_session_reaped(&self) {
        self.session_metrics.active_sessions.dec();
        self.session_metrics.sessions_reaped_total.inc();
    }

    pub fn record_connection_registered(&self) {
        self.session_metrics.active_connections.inc();
    }

    /// Record a connection leaving the hub
    pub fn record_connection_dropped(&self, reason: &str) {
        self.session_metrics.active_connections.dec();
        self.session_metrics
            .connections_dropped_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_tick(&self) {
        self.session_metrics.ticks_total.inc();
    }

    pub fn record_input(&self, outcome: &str) {
        self.session_metrics
            .inputs_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    pub fn set_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("raceway_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "raceway_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("raceway_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let join_requests_total = IntCounterVec::new(
            Opts::new("raceway_join_requests_total", "Join requests by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(join_requests_total.clone()))?;

        let players_waiting = IntGauge::new(
            "raceway_players_waiting",
            "Players currently waiting in queue",
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let entries_skipped_total = IntCounter::new(
            "raceway_queue_entries_skipped_total",
            "Queue entries skipped because they could not be decoded",
        )?;
        registry.register(Box::new(entries_skipped_total.clone()))?;

        Ok(Self {
            join_requests_total,
            players_waiting,
            entries_skipped_total,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_created_total = IntCounterVec::new(
            Opts::new("raceway_matches_created_total", "Total matches created"),
            &["region"],
        )?;
        registry.register(Box::new(matches_created_total.clone()))?;

        let commit_failures_total = IntCounter::new(
            "raceway_match_commit_failures_total",
            "Pairs whose ledger commit failed",
        )?;
        registry.register(Box::new(commit_failures_total.clone()))?;

        let pass_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "raceway_scheduler_pass_duration_seconds",
                "Duration of a full scheduler pass",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(pass_duration_seconds.clone()))?;

        let matches_per_pass = Histogram::with_opts(
            HistogramOpts::new(
                "raceway_scheduler_matches_per_pass",
                "Matches produced by a scheduler pass",
            )
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 50.0, 100.0]),
        )?;
        registry.register(Box::new(matches_per_pass.clone()))?;

        Ok(Self {
            matches_created_total,
            commit_failures_total,
            pass_duration_seconds,
            matches_per_pass,
        })
    }
}

impl SessionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_sessions =
            IntGauge::new("raceway_active_sessions", "Live game sessions")?;
        registry.register(Box::new(active_sessions.clone()))?;

        let sessions_reaped_total = IntCounter::new(
            "raceway_sessions_reaped_total",
            "Game sessions removed after going idle",
        )?;
        registry.register(Box::new(sessions_reaped_total.clone()))?;

        let active_connections =
            IntGauge::new("raceway_active_connections", "Registered connections")?;
        registry.register(Box::new(active_connections.clone()))?;

        let connections_dropped_total = IntCounterVec::new(
            Opts::new(
                "raceway_connections_dropped_total",
                "Connections removed from the hub",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(connections_dropped_total.clone()))?;

        let ticks_total = IntCounter::new("raceway_session_ticks_total", "Session ticks run")?;
        registry.register(Box::new(ticks_total.clone()))?;

        let inputs_total = IntCounterVec::new(
            Opts::new("raceway_session_inputs_total", "Player inputs by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(inputs_total.clone()))?;

        Ok(Self {
            active_sessions,
            sessions_reaped_total,
            active_connections,
            connections_dropped_total,
            ticks_total,
            inputs_total,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn gathered(collector: &MetricsCollector) -> String {
        let encoder = prometheus::TextEncoder::new();
        encoder
            .encode_to_string(&collector.registry().gather())
            .unwrap()
    }

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        let _service = collector.service();
        let _queue = collector.queue();
        let _matches = collector.matches();
        let _session = collector.session();
    }

    #[test]
    fn test_queue_and_match_recording() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_join_request("queued");
        collector.record_join_request("queued");
        collector.record_join_request("rejected");
        collector.record_match_created("US");
        collector.record_scheduler_pass(Duration::from_millis(3), 1);

        assert_eq!(
            collector
                .queue()
                .join_requests_total
                .with_label_values(&["queued"])
                .get(),
            2
        );
        assert_eq!(
            collector
                .matches()
                .matches_created_total
                .with_label_values(&["US"])
                .get(),
            1
        );
        assert!(gathered(&collector).contains("raceway_scheduler_pass_duration_seconds"));
    }

    #[test]
    fn test_session_gauges() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_session_created();
        collector.record_session_created();
        collector.record_session_reaped();
        collector.record_connection_registered();
        collector.record_connection_dropped("unresponsive");

        assert_eq!(collector.session().active_sessions.get(), 1);
        assert_eq!(collector.session().sessions_reaped_total.get(), 1);
        assert_eq!(collector.session().active_connections.get(), 0);
    }

    #[test]
    fn test_health_status_updates() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.update_health_status(2);
        collector.update_component_health("queue_store", true);
        collector.update_component_health("ledger", false);

        assert_eq!(collector.service().health_status.get(), 2);
    }
}
