//! Test fixtures and mock implementations for integration testing

use async_trait::async_trait;
use raceway::config::{MatchmakingSettings, SessionSettings};
use raceway::error::{MatchmakingError, Result};
use raceway::ledger::{InMemoryMatchLedger, MatchLedger};
use raceway::matchmaking::{InMemoryQueueStore, MatchScheduler};
use raceway::metrics::MetricsCollector;
use raceway::session::{BroadcastHub, HubHandle, SessionRegistry};
use raceway::types::{MatchRecord, Player, PlayerMatchStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Build a waiting player
pub fn player(id: &str, region: &str, skill: i64, latency: i64) -> Player {
    Player {
        id: id.to_string(),
        skill,
        region: region.to_string(),
        latency,
        joined_at: 0,
    }
}

/// Ledger whose first `failures` match commits fail, then behaves normally
#[derive(Debug, Default)]
pub struct FlakyLedger {
    inner: InMemoryMatchLedger,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyLedger {
    pub fn failing(failures: usize) -> Self {
        Self {
            inner: InMemoryMatchLedger::new(),
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn match_count(&self) -> usize {
        self.inner.match_count()
    }
}

#[async_trait]
impl MatchLedger for FlakyLedger {
    async fn register_player(&self, player: &Player) -> Result<()> {
        self.inner.register_player(player).await
    }

    async fn create_match(&self, record: &MatchRecord) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(MatchmakingError::LedgerCommitFailed {
                match_id: record.id.clone(),
                message: "injected failure".to_string(),
            }
            .into());
        }
        self.inner.create_match(record).await
    }

    async fn player_status(&self, player_id: &str) -> Result<PlayerMatchStatus> {
        self.inner.player_status(player_id).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

/// Scheduler, hub and registry on in-process backends
pub struct TestSystem {
    pub store: Arc<InMemoryQueueStore>,
    pub scheduler: MatchScheduler,
    pub hub: HubHandle,
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<MetricsCollector>,
    pub shutdown: broadcast::Sender<()>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with(
            MatchmakingSettings::default(),
            SessionSettings::default(),
            Arc::new(InMemoryMatchLedger::new()),
        )
    }

    pub fn with(
        matchmaking: MatchmakingSettings,
        session: SessionSettings,
        ledger: Arc<dyn MatchLedger>,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new().expect("metrics collector"));
        let store = Arc::new(InMemoryQueueStore::new());
        let scheduler = MatchScheduler::with_metrics(
            store.clone(),
            ledger,
            &matchmaking,
            "matchmaking_channel",
            metrics.clone(),
        );
        let (shutdown, shutdown_rx) = broadcast::channel(4);
        let (hub, _task) = BroadcastHub::spawn(metrics.clone(), shutdown_rx);
        let registry = Arc::new(SessionRegistry::new(hub.clone(), session, metrics.clone()));

        Self {
            store,
            scheduler,
            hub,
            registry,
            metrics,
            shutdown,
        }
    }

    /// Current status, panicking on lookup errors
    pub async fn status(&self, player_id: &str) -> PlayerMatchStatus {
        self.scheduler
            .player_status(player_id)
            .await
            .expect("player status")
    }
}
