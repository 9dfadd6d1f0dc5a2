//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the queue store,
//! match ledger, scheduler, broadcast hub and session registry together and
//! owns the background tasks.

use crate::config::AppConfig;
use crate::ledger::{InMemoryMatchLedger, MatchLedger, SqliteMatchLedger};
use crate::matchmaking::{
    InMemoryQueueStore, MatchScheduler, QueueStore, RedisQueueStore, RedisStoreConfig,
};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::service::api::{self, ApiState};
use crate::session::{BroadcastHub, ConnectionContext, HubHandle, SessionRegistry};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// URL scheme selecting the in-process store or ledger
pub const MEMORY_URL_SCHEME: &str = "memory://";

const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(15);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Storage backends
    queue_store: Arc<dyn QueueStore>,
    ledger: Arc<dyn MatchLedger>,

    /// Matchmaking and real-time components
    scheduler: MatchScheduler,
    hub: HubHandle,
    registry: Arc<SessionRegistry>,

    metrics_collector: Arc<MetricsCollector>,

    /// HTTP server, present while the service is started
    metrics_service: Mutex<Option<MetricsService>>,

    /// Fans out to every background task
    shutdown_tx: broadcast::Sender<()>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,

    started_at: Instant,

    /// Wipe queues and ledger on shutdown even outside local/dev
    reset_on_exit: bool,
}

impl AppState {
    /// Initialize the application, connecting to the configured backends
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing raceway service");
        info!(
            "Configuration: service={}, environment={}, queue_store={}, ledger={}",
            config.service.name,
            config.service.environment,
            config.queue_store.url,
            config.ledger.database_url
        );

        let queue_store = Self::initialize_queue_store(&config).await?;
        let ledger = Self::initialize_ledger(&config).await?;

        Self::with_components(config, queue_store, ledger)
    }

    /// Build the application around already-constructed backends
    pub fn with_components(
        config: AppConfig,
        queue_store: Arc<dyn QueueStore>,
        ledger: Arc<dyn MatchLedger>,
    ) -> Result<Self, ServiceError> {
        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let (shutdown_tx, _) = broadcast::channel(1);

        let scheduler = MatchScheduler::with_metrics(
            queue_store.clone(),
            ledger.clone(),
            &config.matchmaking,
            config.queue_store.notification_channel.clone(),
            metrics_collector.clone(),
        );

        let (hub, hub_task) = BroadcastHub::spawn(metrics_collector.clone(), shutdown_tx.subscribe());
        let registry = Arc::new(SessionRegistry::new(
            hub.clone(),
            config.session.clone(),
            metrics_collector.clone(),
        ));

        info!(
            "Matchmaking over {} queues, {} ms session ticks",
            scheduler.queue_keys().len(),
            config.session.tick_interval_ms
        );

        Ok(Self {
            config,
            queue_store,
            ledger,
            scheduler,
            hub,
            registry,
            metrics_collector,
            metrics_service: Mutex::new(None),
            shutdown_tx,
            background_tasks: Mutex::new(vec![hub_task]),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
            reset_on_exit: false,
        })
    }

    /// Clear queues and ledger on shutdown regardless of environment
    pub fn with_reset_on_exit(mut self, reset_on_exit: bool) -> Self {
        self.reset_on_exit = reset_on_exit;
        self
    }

    async fn initialize_queue_store(config: &AppConfig) -> Result<Arc<dyn QueueStore>, ServiceError> {
        let url = &config.queue_store.url;
        if url.starts_with(MEMORY_URL_SCHEME) {
            info!("Using in-memory queue store");
            return Ok(Arc::new(InMemoryQueueStore::new()));
        }

        info!("Connecting to queue store: {}", url);
        let store = RedisQueueStore::connect(RedisStoreConfig {
            url: url.clone(),
            ..Default::default()
        })
        .await
        .map_err(|e| ServiceError::Initialization {
            message: format!("Failed to connect to queue store: {}", e),
        })?;

        Ok(Arc::new(store))
    }

    async fn initialize_ledger(config: &AppConfig) -> Result<Arc<dyn MatchLedger>, ServiceError> {
        let url = &config.ledger.database_url;
        if url.starts_with(MEMORY_URL_SCHEME) {
            info!("Using in-memory match ledger");
            return Ok(Arc::new(InMemoryMatchLedger::new()));
        }

        let ledger = SqliteMatchLedger::connect(url, config.ledger.max_connections)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open match ledger: {}", e),
            })?;

        Ok(Arc::new(ledger))
    }

    /// Start the scheduler, session reaper, HTTP server and metrics task
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting raceway service");

        *self.is_running.write().await = true;

        let scheduler_task = self
            .scheduler
            .start(self.shutdown_tx.subscribe())
            .await
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to start match scheduler: {}", e),
            })?;

        let reaper_task = self
            .registry
            .clone()
            .spawn_reaper(self.config.reap_interval(), self.shutdown_tx.subscribe());

        let health_metrics_task = self.spawn_health_metrics_task();

        {
            let mut tasks = self.background_tasks.lock().await;
            tasks.push(scheduler_task);
            tasks.push(reaper_task);
            tasks.push(health_metrics_task);
        }

        self.start_http_server().await;

        info!("✅ Raceway service started successfully");
        Ok(())
    }

    async fn start_http_server(self: &Arc<Self>) {
        let port = self.config.service.http_port;
        let health_server = HealthServer::new(
            HealthServerConfig {
                port,
                host: "0.0.0.0".to_string(),
            },
            self.metrics_collector.clone(),
        )
        .with_app_state(self.clone())
        .with_routes(api::router(self.api_state()));

        let metrics_service = MetricsService::new(
            self.metrics_collector.clone(),
            Arc::new(health_server),
        );

        let server = metrics_service.clone();
        let server_task = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("HTTP server failed: {}", e);
            } else {
                info!("HTTP server task completed");
            }
        });

        *self.metrics_service.lock().await = Some(metrics_service);
        self.background_tasks.lock().await.push(server_task);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ HTTP endpoints started on port {}", port);
    }

    fn spawn_health_metrics_task(&self) -> JoinHandle<()> {
        let metrics_collector = self.metrics_collector.clone();
        let scheduler = self.scheduler.clone();
        let ledger = self.ledger.clone();
        let started_at = self.started_at;
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);
            info!("Health metrics task started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        metrics_collector.set_uptime(started_at.elapsed());

                        let store_ok = match scheduler.players_waiting().await {
                            Ok(waiting) => {
                                metrics_collector.set_players_waiting(waiting);
                                true
                            }
                            Err(e) => {
                                warn!("Queue store health probe failed: {}", e);
                                false
                            }
                        };
                        let ledger_ok = match ledger.ping().await {
                            Ok(()) => true,
                            Err(e) => {
                                warn!("Ledger health probe failed: {}", e);
                                false
                            }
                        };

                        let listening = scheduler.is_listening();

                        metrics_collector.update_component_health("queue_store", store_ok);
                        metrics_collector.update_component_health("ledger", ledger_ok);
                        metrics_collector.update_component_health("matchmaker", listening);
                        // 2 = healthy, 1 = degraded
                        let healthy = store_ok && ledger_ok && listening;
                        metrics_collector.update_health_status(if healthy { 2 } else { 1 });

                        debug!("Updated service health metrics - uptime: {:?}", started_at.elapsed());
                    }
                    _ = shutdown.recv() => break,
                }
            }

            info!("Health metrics task stopped");
        })
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of raceway service");

        *self.is_running.write().await = false;

        if self.shutdown_tx.send(()).is_err() {
            debug!("No background task was listening for shutdown");
        }

        if let Some(metrics_service) = self.metrics_service.lock().await.take() {
            if let Err(e) = metrics_service.stop().await {
                warn!("Failed to stop HTTP server: {}", e);
            }
        }

        match self.registry.shutdown_all() {
            Ok(count) => info!("✅ {} game sessions stopped", count),
            Err(e) => warn!("Failed to stop game sessions: {}", e),
        }

        if self.reset_on_exit || self.config.is_disposable_environment() {
            self.reset_stores().await;
        }

        self.stop_background_tasks().await;

        let final_stats = self
            .scheduler
            .get_stats()
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to get final stats: {}", e),
            })?;

        info!("Final scheduler statistics: {:?}", final_stats);
        info!("✅ Raceway service shutdown completed");

        Ok(())
    }

    /// Remove every queued entry and every ledger row
    async fn reset_stores(&self) {
        info!(
            "Clearing queues and ledger ({} environment)",
            self.config.service.environment
        );

        if let Err(e) = self.scheduler.clear_queues().await {
            warn!("Failed to clear queues: {}", e);
        }
        if let Err(e) = self.ledger.clear().await {
            warn!("Failed to clear match ledger: {}", e);
        }
    }

    /// Wait for background tasks, aborting any still running at the deadline
    async fn stop_background_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        let task_count = tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Waiting for {} background tasks...", task_count);
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout();

        for (i, task) in tasks.into_iter().enumerate() {
            let abort = task.abort_handle();
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(())) => debug!("Background task {}/{} finished", i + 1, task_count),
                Ok(Err(e)) => warn!("Background task {}/{} failed: {}", i + 1, task_count, e),
                Err(_) => {
                    warn!(
                        "Background task {}/{} did not stop in time, aborting",
                        i + 1,
                        task_count
                    );
                    abort.abort();
                }
            }
        }

        info!("✅ All {} background tasks stopped", task_count);
    }

    /// State handed to the API handlers
    pub fn api_state(&self) -> ApiState {
        ApiState {
            scheduler: self.scheduler.clone(),
            connections: ConnectionContext {
                registry: self.registry.clone(),
                hub: self.hub.clone(),
                outbound_buffer: self.config.session.outbound_buffer,
                metrics_collector: self.metrics_collector.clone(),
            },
        }
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub fn scheduler(&self) -> &MatchScheduler {
        &self.scheduler
    }

    pub fn queue_store(&self) -> Arc<dyn QueueStore> {
        self.queue_store.clone()
    }

    pub fn ledger(&self) -> Arc<dyn MatchLedger> {
        self.ledger.clone()
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }
}
