//! Matchmaking scheduler
//!
//! The scheduler is the producer and the consumer of the region/tier queues:
//! `enqueue` adds a player and publishes a wake-up, and a single listener task
//! runs one full scan-and-pair pass over every queue per wake-up.
//!
//! The pairing pass is a linear walk over each queue in ascending skill order.
//! Adjacent players are compared; a compatible pair is committed to the ledger
//! and both entries are removed, otherwise the walk moves on by one. This is an
//! O(n) heuristic, not an optimal matching: a player rejected against their
//! neighbour is not retried against anyone further up the queue in the same
//! pass.

use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::ledger::MatchLedger;
use crate::matchmaking::compatibility::{
    queue_key, queue_key_for, CompatibilityRule, PairingRule,
};
use crate::matchmaking::store::{Notifications, QueueStore};
use crate::metrics::MetricsCollector;
use crate::types::{MatchRecord, MatchState, Player, Tier};
use crate::utils::{generate_match_id, unix_timestamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Payload published after every enqueue; subscribers only treat it as a wake-up
pub const NEW_PLAYER_EVENT: &str = "new_player";

const RESUBSCRIBE_INITIAL_DELAY: Duration = Duration::from_millis(250);
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(30);

/// Statistics about scheduler operations
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Players successfully enqueued
    pub players_enqueued: u64,
    /// Full passes over every queue
    pub passes_run: u64,
    /// Matches committed to the ledger
    pub matches_created: u64,
    /// Pairs whose ledger commit failed and stayed queued
    pub commit_failures: u64,
    /// Queue entries that failed to deserialize
    pub entries_skipped: u64,
}

/// Outcome of scanning a single queue
#[derive(Debug, Clone, Default)]
pub struct QueueScan {
    /// Matches committed during the scan
    pub matches: Vec<MatchRecord>,
    /// Pairs left queued because the commit failed
    pub failed_commits: usize,
    /// Entries ignored because they could not be deserialized
    pub skipped_entries: usize,
}

/// Outcome of one pass over every queue
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    pub queues_scanned: usize,
    pub matches: Vec<MatchRecord>,
    pub failed_commits: usize,
    pub skipped_entries: usize,
}

/// A queue entry: the exact stored bytes plus the decoded player
struct QueuedPlayer {
    raw: String,
    player: Player,
}

/// The matchmaking scheduler
#[derive(Clone)]
pub struct MatchScheduler {
    store: Arc<dyn QueueStore>,
    ledger: Arc<dyn MatchLedger>,
    rule: Arc<dyn PairingRule>,
    regions: Vec<String>,
    channel: String,
    stats: Arc<RwLock<SchedulerStats>>,
    listening: Arc<AtomicBool>,
    metrics_collector: Arc<MetricsCollector>,
}

impl MatchScheduler {
    /// Create a scheduler with the configured pairing rule
    pub fn new(
        store: Arc<dyn QueueStore>,
        ledger: Arc<dyn MatchLedger>,
        settings: &MatchmakingSettings,
        channel: impl Into<String>,
    ) -> Self {
        let metrics_collector = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(store, ledger, settings, channel, metrics_collector)
    }

    /// Create a scheduler with an explicit metrics collector
    pub fn with_metrics(
        store: Arc<dyn QueueStore>,
        ledger: Arc<dyn MatchLedger>,
        settings: &MatchmakingSettings,
        channel: impl Into<String>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            ledger,
            rule: Arc::new(CompatibilityRule::from_settings(settings)),
            regions: settings.regions.clone(),
            channel: channel.into(),
            stats: Arc::new(RwLock::new(SchedulerStats::default())),
            listening: Arc::new(AtomicBool::new(false)),
            metrics_collector,
        }
    }

    /// Replace the pairing rule
    pub fn with_rule(mut self, rule: Arc<dyn PairingRule>) -> Self {
        self.rule = rule;
        self
    }

    /// Every queue the scheduler scans, region-major
    pub fn queue_keys(&self) -> Vec<String> {
        self.regions
            .iter()
            .flat_map(|region| Tier::ALL.iter().map(move |tier| queue_key(region, *tier)))
            .collect()
    }

    /// Reject payloads that could never be paired
    pub fn validate_player(&self, player: &Player) -> Result<()> {
        if player.id.trim().is_empty() {
            return Err(MatchmakingError::validation("player id cannot be empty").into());
        }
        if player.skill < 0 {
            return Err(MatchmakingError::validation(format!(
                "skill rating cannot be negative: {}",
                player.skill
            ))
            .into());
        }
        if player.latency < 0 {
            return Err(MatchmakingError::validation(format!(
                "latency cannot be negative: {}",
                player.latency
            ))
            .into());
        }
        if !self.regions.iter().any(|r| r == &player.region) {
            return Err(MatchmakingError::validation(format!(
                "unknown region '{}' (expected one of {:?})",
                player.region, self.regions
            ))
            .into());
        }
        Ok(())
    }

    /// Handle a join request: validate, record the player as waiting, enqueue
    ///
    /// Recording in the ledger is best-effort; only the queue insert decides
    /// whether the join succeeded.
    pub async fn join_queue(&self, mut player: Player) -> Result<()> {
        let start_time = Instant::now();

        if let Err(e) = self.validate_player(&player) {
            self.metrics_collector.record_join_request("rejected");
            return Err(e);
        }
        if player.joined_at == 0 {
            player.joined_at = unix_timestamp();
        }

        if let Err(e) = self.ledger.register_player(&player).await {
            warn!(
                "Could not record player '{}' as waiting, continuing: {}",
                player.id, e
            );
        }

        let result = self.enqueue(&player).await;
        self.metrics_collector.record_join_request(if result.is_ok() {
            "queued"
        } else {
            "unavailable"
        });

        info!(
            "Join request - player: '{}', region: {}, skill: {}, latency: {}ms, duration: {:.2}ms, result: {}",
            player.id,
            player.region,
            player.skill,
            player.latency,
            start_time.elapsed().as_secs_f64() * 1000.0,
            if result.is_ok() { "QUEUED" } else { "FAILED" }
        );

        result
    }

    /// Insert the player into its region/tier queue and publish a wake-up
    pub async fn enqueue(&self, player: &Player) -> Result<()> {
        let member = serde_json::to_string(player).map_err(|e| MatchmakingError::InternalError {
            message: format!("Failed to serialize player '{}': {}", player.id, e),
        })?;
        let queue = queue_key_for(player);

        self.store
            .insert(&queue, &member, player.skill as f64)
            .await
            .map_err(as_queue_unavailable)?;

        if let Err(e) = self.store.publish(&self.channel, NEW_PLAYER_EVENT).await {
            // Without the wake-up the entry would sit unseen; undo it
            if let Err(undo) = self.store.remove(&queue, &member).await {
                error!(
                    "Failed to roll back entry for '{}' in {}: {}",
                    player.id, queue, undo
                );
            }
            return Err(as_queue_unavailable(e));
        }

        {
            let mut stats = self
                .stats
                .write()
                .map_err(|_| MatchmakingError::InternalError {
                    message: "Failed to acquire stats lock".to_string(),
                })?;
            stats.players_enqueued += 1;
        }

        debug!("Enqueued player '{}' in {}", player.id, queue);
        Ok(())
    }

    /// Ask the running listener for a pass without scanning here
    ///
    /// Passes must never overlap on a queue, so anything outside the listener
    /// task wakes it up instead of calling `run_pass` itself.
    pub async fn request_pass(&self) -> Result<()> {
        self.store
            .publish(&self.channel, NEW_PLAYER_EVENT)
            .await
            .map_err(as_queue_unavailable)
    }

    /// Run one full pass over every queue
    ///
    /// A queue that cannot be read is logged and skipped; the pass continues.
    pub async fn run_pass(&self) -> PassSummary {
        let start_time = Instant::now();
        let mut summary = PassSummary::default();

        for queue in self.queue_keys() {
            match self.process_queue(&queue).await {
                Ok(scan) => {
                    summary.queues_scanned += 1;
                    summary.failed_commits += scan.failed_commits;
                    summary.skipped_entries += scan.skipped_entries;
                    summary.matches.extend(scan.matches);
                }
                Err(e) => {
                    error!("Error reading queue {}: {}", queue, e);
                }
            }
        }

        let duration = start_time.elapsed();
        if let Ok(mut stats) = self.stats.write() {
            stats.passes_run += 1;
            stats.matches_created += summary.matches.len() as u64;
            stats.commit_failures += summary.failed_commits as u64;
            stats.entries_skipped += summary.skipped_entries as u64;
        }
        self.metrics_collector
            .record_scheduler_pass(duration, summary.matches.len());

        if summary.matches.is_empty() {
            debug!(
                "Scheduler pass found no matches ({} queues, {:.2}ms)",
                summary.queues_scanned,
                duration.as_secs_f64() * 1000.0
            );
        } else {
            info!(
                "Scheduler pass created {} matches ({} queues, {} failed commits, {:.2}ms)",
                summary.matches.len(),
                summary.queues_scanned,
                summary.failed_commits,
                duration.as_secs_f64() * 1000.0
            );
        }

        summary
    }

    /// Scan one queue and pair adjacent compatible players
    pub async fn process_queue(&self, queue: &str) -> Result<QueueScan> {
        let members = self.store.range_all(queue).await?;
        let mut scan = QueueScan::default();

        if members.len() < 2 {
            return Ok(scan);
        }

        let mut players = Vec::with_capacity(members.len());
        for raw in members {
            match serde_json::from_str::<Player>(&raw) {
                Ok(player) => players.push(QueuedPlayer { raw, player }),
                Err(e) => {
                    warn!("Skipping malformed entry in {}: {}", queue, e);
                    self.metrics_collector.record_skipped_entry();
                    scan.skipped_entries += 1;
                }
            }
        }

        let mut i = 0;
        while i + 1 < players.len() {
            let first = &players[i];
            let second = &players[i + 1];

            if !self.rule.can_pair(&first.player, &second.player) {
                i += 1;
                continue;
            }

            match self.commit_match(&first.player, &second.player).await {
                Ok(record) => {
                    self.remove_entry(queue, &first.raw, &first.player.id).await;
                    self.remove_entry(queue, &second.raw, &second.player.id).await;
                    scan.matches.push(record);
                }
                Err(e) => {
                    error!(
                        "Pairing of '{}' and '{}' failed, leaving both queued: {}",
                        first.player.id, second.player.id, e
                    );
                    self.metrics_collector.record_commit_failure();
                    scan.failed_commits += 1;
                }
            }
            i += 2;
        }

        Ok(scan)
    }

    async fn commit_match(&self, first: &Player, second: &Player) -> Result<MatchRecord> {
        let record = MatchRecord {
            id: generate_match_id(&first.id, &second.id, unix_timestamp()),
            players: [first.id.clone(), second.id.clone()],
            region: first.region.clone(),
            status: MatchState::Matched,
        };

        self.ledger.create_match(&record).await?;
        self.metrics_collector.record_match_created(&record.region);

        info!(
            "Match created: {} between '{}' and '{}' (region: {}, skill gap: {})",
            record.id,
            first.id,
            second.id,
            record.region,
            (first.skill - second.skill).abs()
        );
        Ok(record)
    }

    async fn remove_entry(&self, queue: &str, raw: &str, player_id: &str) {
        match self.store.remove(queue, raw).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "Entry for '{}' was already gone from {} after matching",
                player_id, queue
            ),
            Err(e) => error!(
                "Failed to remove matched player '{}' from {}: {}",
                player_id, queue, e
            ),
        }
    }

    /// Subscribe to the notification channel and start the listener task
    ///
    /// One pass runs immediately so entries queued while the scheduler was
    /// down are considered. Notifications that arrive during a pass are
    /// coalesced into a single follow-up pass.
    pub async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<JoinHandle<()>> {
        let notifications = self
            .store
            .subscribe(&self.channel)
            .await
            .map_err(as_queue_unavailable)?;

        info!(
            "Matchmaker subscribed to '{}', scanning {} queues",
            self.channel,
            self.queue_keys().len()
        );

        self.listening.store(true, Ordering::SeqCst);
        let scheduler = self.clone();
        Ok(tokio::spawn(async move {
            scheduler.listen(notifications, shutdown).await;
        }))
    }

    async fn listen(&self, mut notifications: Notifications, mut shutdown: broadcast::Receiver<()>) {
        self.run_pass().await;

        loop {
            tokio::select! {
                event = notifications.recv() => {
                    let Some(payload) = event else {
                        warn!("Notification channel closed, resubscribing to '{}'", self.channel);
                        self.listening.store(false, Ordering::SeqCst);

                        let Some(fresh) = self.resubscribe(&mut shutdown).await else {
                            break;
                        };
                        notifications = fresh;
                        self.listening.store(true, Ordering::SeqCst);

                        // Catch up on joins published while unsubscribed
                        self.run_pass().await;
                        continue;
                    };

                    let mut coalesced = 0;
                    while notifications.try_recv().is_ok() {
                        coalesced += 1;
                    }
                    debug!("Received '{}' (+{} coalesced), running pass", payload, coalesced);

                    self.run_pass().await;
                }
                _ = shutdown.recv() => {
                    info!("Matchmaker shutdown signal received");
                    break;
                }
            }
        }

        self.listening.store(false, Ordering::SeqCst);
        info!("Matchmaker stopped");
    }

    /// Subscribe again with exponential backoff; `None` once shutdown is signalled
    async fn resubscribe(&self, shutdown: &mut broadcast::Receiver<()>) -> Option<Notifications> {
        let mut attempt = 0u32;
        let mut delay = RESUBSCRIBE_INITIAL_DELAY;

        loop {
            attempt += 1;
            match self.store.subscribe(&self.channel).await {
                Ok(notifications) => {
                    info!(
                        "Matchmaker resubscribed to '{}' after {} attempts",
                        self.channel, attempt
                    );
                    return Some(notifications);
                }
                Err(e) => warn!(
                    "Resubscribe attempt {} to '{}' failed: {}. Retrying in {:?}",
                    attempt, self.channel, e, delay
                ),
            }

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.recv() => {
                    info!("Matchmaker shutdown signal received while resubscribing");
                    return None;
                }
            }
            delay = (delay * 2).min(RESUBSCRIBE_MAX_DELAY);
        }
    }

    /// Whether the listener task holds a live subscription
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Delete every known queue (local/dev cleanup)
    pub async fn clear_queues(&self) -> Result<()> {
        for queue in self.queue_keys() {
            self.store.clear(&queue).await?;
        }
        Ok(())
    }

    /// Get scheduler statistics
    pub fn get_stats(&self) -> Result<SchedulerStats> {
        let stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?;

        Ok(stats.clone())
    }

    /// Number of entries currently waiting across every queue
    pub async fn players_waiting(&self) -> Result<usize> {
        let mut total = 0;
        for queue in self.queue_keys() {
            total += self.store.range_all(&queue).await?.len();
        }
        Ok(total)
    }

    /// Look up a player's status in the ledger
    pub async fn player_status(&self, player_id: &str) -> Result<crate::types::PlayerMatchStatus> {
        self.ledger.player_status(player_id).await
    }
}

/// Keep an existing QueueUnavailable, wrap anything else as one
fn as_queue_unavailable(e: anyhow::Error) -> anyhow::Error {
    match e.downcast_ref::<MatchmakingError>() {
        Some(MatchmakingError::QueueUnavailable { .. }) => e,
        _ => MatchmakingError::queue_unavailable(e).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryMatchLedger, MockMatchLedger};
    use crate::matchmaking::store::InMemoryQueueStore;
    use crate::types::PlayerMatchStatus;
    use tokio::time::timeout;

    const US_NEWBIE: &str = "queue:US:newbie";

    fn player(id: &str, skill: i64, latency: i64) -> Player {
        Player {
            id: id.to_string(),
            skill,
            region: "US".to_string(),
            latency,
            joined_at: 1_700_000_000,
        }
    }

    type TestScheduler = (
        MatchScheduler,
        Arc<InMemoryQueueStore>,
        Arc<InMemoryMatchLedger>,
    );

    fn create_scheduler_with(settings: &MatchmakingSettings) -> TestScheduler {
        let store = Arc::new(InMemoryQueueStore::new());
        let ledger = Arc::new(InMemoryMatchLedger::new());
        let scheduler = MatchScheduler::new(
            store.clone(),
            ledger.clone(),
            settings,
            "matchmaking_channel",
        );
        (scheduler, store, ledger)
    }

    fn create_test_scheduler() -> TestScheduler {
        create_scheduler_with(&MatchmakingSettings::default())
    }

    /// Put players straight into one queue regardless of their tier
    async fn seed(store: &InMemoryQueueStore, queue: &str, players: &[Player]) {
        for p in players {
            let member = serde_json::to_string(p).unwrap();
            store.insert(queue, &member, p.skill as f64).await.unwrap();
        }
    }

    fn queued_ids(members: Vec<String>) -> Vec<String> {
        members
            .iter()
            .map(|m| serde_json::from_str::<Player>(m).unwrap().id)
            .collect()
    }

    #[tokio::test]
    async fn test_empty_and_single_queue_are_untouched() {
        let (scheduler, store, ledger) = create_test_scheduler();

        let scan = scheduler.process_queue(US_NEWBIE).await.unwrap();
        assert!(scan.matches.is_empty());

        seed(&store, US_NEWBIE, &[player("solo", 300, 10)]).await;
        let scan = scheduler.process_queue(US_NEWBIE).await.unwrap();
        assert!(scan.matches.is_empty());
        assert_eq!(store.len(US_NEWBIE), 1);
        assert_eq!(ledger.match_count(), 0);
    }

    #[tokio::test]
    async fn test_pairs_closest_and_leaves_outlier() {
        let (scheduler, store, ledger) = create_test_scheduler();
        seed(
            &store,
            US_NEWBIE,
            &[player("a", 300, 20), player("b", 310, 30), player("c", 900, 40)],
        )
        .await;

        let scan = scheduler.process_queue(US_NEWBIE).await.unwrap();

        assert_eq!(scan.matches.len(), 1);
        assert_eq!(scan.matches[0].players, ["a".to_string(), "b".to_string()]);
        assert_eq!(queued_ids(store.range_all(US_NEWBIE).await.unwrap()), vec!["c"]);
        assert_eq!(ledger.match_count(), 1);
    }

    #[tokio::test]
    async fn test_directional_latency_blocks_pair() {
        let (scheduler, store, _ledger) = create_test_scheduler();
        seed(&store, US_NEWBIE, &[player("a", 300, 90), player("b", 450, 20)]).await;

        let scan = scheduler.process_queue(US_NEWBIE).await.unwrap();
        assert!(scan.matches.is_empty());
        assert_eq!(store.len(US_NEWBIE), 2);

        // Within the skill gap the latency order alone decides
        let (scheduler, store, _ledger) = create_test_scheduler();
        seed(&store, US_NEWBIE, &[player("a", 300, 90), player("b", 350, 20)]).await;
        let scan = scheduler.process_queue(US_NEWBIE).await.unwrap();
        assert!(scan.matches.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_candidate_not_retried_in_same_pass() {
        let (scheduler, store, _ledger) = create_test_scheduler();
        // a-b fails on latency, b-c pairs; a-c would have been fine but is never tried
        seed(
            &store,
            US_NEWBIE,
            &[player("a", 300, 50), player("b", 310, 10), player("c", 320, 60)],
        )
        .await;

        let scan = scheduler.process_queue(US_NEWBIE).await.unwrap();
        assert_eq!(scan.matches.len(), 1);
        assert_eq!(scan.matches[0].players, ["b".to_string(), "c".to_string()]);
        assert_eq!(queued_ids(store.range_all(US_NEWBIE).await.unwrap()), vec!["a"]);
    }

    #[tokio::test]
    async fn test_removes_exactly_the_paired_entries() {
        let (scheduler, store, _ledger) = create_test_scheduler();
        seed(
            &store,
            US_NEWBIE,
            &[
                player("a", 300, 10),
                player("b", 310, 20),
                player("c", 310, 5),
                player("d", 480, 10),
            ],
        )
        .await;

        let scan = scheduler.process_queue(US_NEWBIE).await.unwrap();

        // Sorted: a(300), b(310), c(310), d(480); a-b pairs, c-d exceeds the gap
        assert_eq!(scan.matches.len(), 1);
        assert_eq!(scan.matches[0].players, ["a".to_string(), "b".to_string()]);
        assert_eq!(
            queued_ids(store.range_all(US_NEWBIE).await.unwrap()),
            vec!["c", "d"]
        );
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let (scheduler, store, _ledger) = create_test_scheduler();
        seed(&store, US_NEWBIE, &[player("a", 300, 10), player("b", 320, 20)]).await;
        store.insert(US_NEWBIE, "{not json", 305.0).await.unwrap();

        let scan = scheduler.process_queue(US_NEWBIE).await.unwrap();

        assert_eq!(scan.skipped_entries, 1);
        assert_eq!(scan.matches.len(), 1);
        // The corrupt entry is left alone
        assert_eq!(store.range_all(US_NEWBIE).await.unwrap(), vec!["{not json"]);
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_pair_queued() {
        let store = Arc::new(InMemoryQueueStore::new());
        let mut ledger = MockMatchLedger::new();
        ledger
            .expect_create_match()
            .times(1)
            .returning(|record| {
                Err(MatchmakingError::LedgerCommitFailed {
                    match_id: record.id.clone(),
                    message: "database is locked".to_string(),
                }
                .into())
            });

        let scheduler = MatchScheduler::new(
            store.clone(),
            Arc::new(ledger),
            &MatchmakingSettings::default(),
            "matchmaking_channel",
        );
        seed(&store, US_NEWBIE, &[player("a", 300, 10), player("b", 310, 20)]).await;

        let scan = scheduler.process_queue(US_NEWBIE).await.unwrap();

        assert!(scan.matches.is_empty());
        assert_eq!(scan.failed_commits, 1);
        assert_eq!(store.len(US_NEWBIE), 2);
    }

    #[tokio::test]
    async fn test_enqueue_targets_region_tier_queue() {
        let (scheduler, store, _ledger) = create_test_scheduler();
        let mut notifications = store.subscribe("matchmaking_channel").await.unwrap();

        scheduler.enqueue(&player("a", 650, 40)).await.unwrap();

        assert_eq!(store.len("queue:US:specialist"), 1);
        assert_eq!(notifications.recv().await.unwrap(), NEW_PLAYER_EVENT);
        assert_eq!(scheduler.get_stats().unwrap().players_enqueued, 1);
    }

    #[tokio::test]
    async fn test_enqueue_fails_when_store_down() {
        let (scheduler, store, _ledger) = create_test_scheduler();
        store.set_available(false);

        let err = scheduler.enqueue(&player("a", 650, 40)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::QueueUnavailable { .. })
        ));

        store.set_available(true);
        assert_eq!(store.len("queue:US:specialist"), 0);
    }

    #[tokio::test]
    async fn test_join_rejects_invalid_players() {
        let (scheduler, store, _ledger) = create_test_scheduler();

        let mut unknown_region = player("a", 650, 40);
        unknown_region.region = "MARS".to_string();
        let negative_skill = player("b", -5, 40);
        let blank_id = player(" ", 650, 40);

        for p in [unknown_region, negative_skill, blank_id] {
            let err = scheduler.join_queue(p).await.unwrap_err();
            assert!(matches!(
                err.downcast_ref::<MatchmakingError>(),
                Some(MatchmakingError::ValidationError { .. })
            ));
        }
        assert_eq!(scheduler.players_waiting().await.unwrap(), 0);
        assert_eq!(store.len("queue:MARS:specialist"), 0);
    }

    #[tokio::test]
    async fn test_directional_policy_keeps_higher_ping_lower_skill_waiting() {
        let (scheduler, _store, ledger) = create_test_scheduler();

        // B sorts first (640) but has the higher latency, so the ordered check fails
        scheduler.join_queue(player("A", 650, 40)).await.unwrap();
        scheduler.join_queue(player("B", 640, 50)).await.unwrap();

        let summary = scheduler.run_pass().await;
        assert!(summary.matches.is_empty());
        assert_eq!(ledger.match_count(), 0);
        assert_eq!(scheduler.players_waiting().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_join_then_pass_end_to_end() {
        let settings = MatchmakingSettings {
            latency_policy: crate::types::LatencyPolicy::Symmetric,
            ..Default::default()
        };
        let (scheduler, _store, ledger) = create_scheduler_with(&settings);

        scheduler.join_queue(player("A", 650, 40)).await.unwrap();
        scheduler.join_queue(player("B", 640, 50)).await.unwrap();
        assert_eq!(
            scheduler.player_status("A").await.unwrap(),
            PlayerMatchStatus::Waiting
        );

        let summary = scheduler.run_pass().await;
        assert_eq!(summary.matches.len(), 1);
        assert_eq!(summary.queues_scanned, 12);

        let record = &summary.matches[0];
        // Ascending skill order puts B (640) first
        assert_eq!(record.players, ["B".to_string(), "A".to_string()]);
        assert_eq!(record.region, "US");
        assert_eq!(ledger.get_match(&record.id).as_ref(), Some(record));
        assert_eq!(
            scheduler.player_status("A").await.unwrap(),
            PlayerMatchStatus::Matched {
                match_id: record.id.clone()
            }
        );
        assert_eq!(scheduler.players_waiting().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_listener_pairs_on_notification() {
        let (scheduler, _store, ledger) = create_test_scheduler();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = scheduler.start(shutdown_rx).await.unwrap();

        scheduler.join_queue(player("x", 100, 10)).await.unwrap();
        scheduler.join_queue(player("y", 150, 20)).await.unwrap();

        timeout(Duration::from_secs(2), async {
            while ledger.match_count() == 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("listener should pair the players");

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(scheduler.get_stats().unwrap().passes_run >= 2);
    }

    #[tokio::test]
    async fn test_listener_survives_lost_subscription() {
        let (scheduler, store, ledger) = create_test_scheduler();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = scheduler.start(shutdown_rx).await.unwrap();
        assert!(scheduler.is_listening());

        // Connection drops and stays down for a while
        store.set_available(false);
        store.drop_subscribers();
        timeout(Duration::from_secs(2), async {
            while scheduler.is_listening() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("listener should notice the lost subscription");

        // Players land in the queue without any wake-up reaching the listener
        store.set_available(true);
        seed(&store, US_NEWBIE, &[player("x", 100, 10), player("y", 150, 20)]).await;

        timeout(Duration::from_secs(5), async {
            while ledger.match_count() == 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("catch-up pass should pair the players");
        assert!(scheduler.is_listening());

        // Fresh subscription still receives wake-ups
        scheduler.join_queue(player("p", 300, 10)).await.unwrap();
        scheduler.join_queue(player("q", 320, 20)).await.unwrap();
        timeout(Duration::from_secs(2), async {
            while ledger.match_count() < 2 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("listener should keep pairing after resubscribing");

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(!scheduler.is_listening());
    }

    #[tokio::test]
    async fn test_request_pass_wakes_listener_without_scanning() {
        let (scheduler, store, ledger) = create_test_scheduler();
        let mut wakeups = store.subscribe("matchmaking_channel").await.unwrap();
        seed(&store, US_NEWBIE, &[player("x", 100, 10), player("y", 150, 20)]).await;

        scheduler.request_pass().await.unwrap();

        assert_eq!(wakeups.recv().await.unwrap(), NEW_PLAYER_EVENT);
        assert_eq!(ledger.match_count(), 0);
        assert_eq!(store.len(US_NEWBIE), 2);
        assert_eq!(scheduler.get_stats().unwrap().passes_run, 0);
    }
}
