//! Integration tests for the raceway service
//!
//! These tests drive the system end to end on in-process backends:
//! - Joining, pairing and status lookups across the scheduler and ledger
//! - Notification-driven scheduling
//! - Ledger failures and retry on the next pass
//! - Session snapshots fanned out through the hub, including slow consumers

// Modules for organizing tests
mod fixtures;

use raceway::config::{MatchmakingSettings, SessionSettings};
use raceway::matchmaking::QueueStore;
use raceway::session::Connection;
use raceway::types::{CarState, LatencyPolicy, PlayerInput, PlayerMatchStatus, SessionSnapshot};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fixtures::{player, FlakyLedger, TestSystem};

fn matched_id(status: PlayerMatchStatus) -> String {
    match status {
        PlayerMatchStatus::Matched { match_id } => match_id,
        PlayerMatchStatus::Waiting => panic!("player is still waiting"),
    }
}

#[tokio::test]
async fn test_join_pair_and_race() {
    let settings = MatchmakingSettings {
        latency_policy: LatencyPolicy::Symmetric,
        ..Default::default()
    };
    let system = TestSystem::with(
        settings,
        SessionSettings::default(),
        Arc::new(raceway::InMemoryMatchLedger::new()),
    );

    system.scheduler.join_queue(player("A", "US", 650, 40)).await.unwrap();
    system.scheduler.join_queue(player("B", "US", 640, 50)).await.unwrap();
    assert_eq!(system.status("A").await, PlayerMatchStatus::Waiting);

    let summary = system.scheduler.run_pass().await;
    assert_eq!(summary.matches.len(), 1);

    let match_id = matched_id(system.status("A").await);
    assert_eq!(matched_id(system.status("B").await), match_id);
    assert!(system.store.is_empty("queue:US:specialist"));

    // Both players connect to the match's session
    let session = system.registry.add_player(&match_id, "A").unwrap();
    system.registry.add_player(&match_id, "B").unwrap();
    let (connection, mut outbound) = Connection::new(match_id.clone(), "B", 64);
    system.hub.register(connection).unwrap();

    session
        .apply_input(PlayerInput {
            player_id: "A".to_string(),
            action: "move".to_string(),
            payload: CarState {
                x: 12.0,
                y: 3.0,
                speed: 4.0,
                ..Default::default()
            },
        })
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let frame = outbound.recv().await.expect("hub closed the connection");
            let snapshot: SessionSnapshot = serde_json::from_str(&frame).unwrap();
            if snapshot.players.get("A").is_some_and(|car| car.x == 12.0) {
                return snapshot;
            }
        }
    })
    .await
    .expect("snapshot with A's input");

    assert_eq!(frame.match_id, match_id);
    assert_eq!(frame.players.len(), 2);
    assert_eq!(frame.players["A"].speed, 4.0);
}

#[tokio::test]
async fn test_listener_pairs_on_notification() {
    let system = TestSystem::new();
    let task = system
        .scheduler
        .start(system.shutdown.subscribe())
        .await
        .unwrap();

    system.scheduler.join_queue(player("a", "EU", 300, 20)).await.unwrap();
    system.scheduler.join_queue(player("b", "EU", 310, 30)).await.unwrap();

    let match_id = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let PlayerMatchStatus::Matched { match_id } = system.status("b").await {
                return match_id;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("listener never paired the players");

    assert_eq!(matched_id(system.status("a").await), match_id);

    system.shutdown.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("listener did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_far_apart_player_keeps_waiting() {
    let system = TestSystem::new();
    for p in [
        player("low", "US", 300, 10),
        player("mid", "US", 310, 20),
        player("far", "US", 450, 30),
    ] {
        system.scheduler.join_queue(p).await.unwrap();
    }

    let summary = system.scheduler.run_pass().await;

    assert_eq!(summary.matches.len(), 1);
    assert_eq!(system.status("far").await, PlayerMatchStatus::Waiting);
    assert_eq!(system.store.len("queue:US:newbie"), 1);
}

#[tokio::test]
async fn test_regions_never_mix() {
    let system = TestSystem::new();
    system.scheduler.join_queue(player("us", "US", 500, 10)).await.unwrap();
    system.scheduler.join_queue(player("eu", "EU", 500, 10)).await.unwrap();

    let summary = system.scheduler.run_pass().await;

    assert!(summary.matches.is_empty());
    assert_eq!(system.scheduler.players_waiting().await.unwrap(), 2);
}

#[tokio::test]
async fn test_concurrent_joins_pair_each_player_once() {
    let system = Arc::new(TestSystem::new());

    let mut tasks = Vec::new();
    for i in 0..50 {
        let system = system.clone();
        tasks.push(tokio::spawn(async move {
            // 50 players 2 points apart inside the newbie tier, ascending latency
            let p = player(&format!("p{:02}", i), "ASIA", 200 + i * 2, 10 + i);
            system.scheduler.join_queue(p).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(system.store.len("queue:ASIA:newbie"), 50);

    let summary = system.scheduler.run_pass().await;
    assert_eq!(summary.matches.len(), 25);

    let mut seen = HashSet::new();
    for record in &summary.matches {
        for id in &record.players {
            assert!(seen.insert(id.clone()), "{} paired twice", id);
        }
    }
    assert_eq!(seen.len(), 50);
    assert!(system.store.is_empty("queue:ASIA:newbie"));
}

#[tokio::test]
async fn test_failed_commit_retries_on_next_pass() {
    let ledger = Arc::new(FlakyLedger::failing(1));
    let system = TestSystem::with(
        MatchmakingSettings::default(),
        SessionSettings::default(),
        ledger.clone(),
    );
    system.scheduler.join_queue(player("a", "EU", 50, 10)).await.unwrap();
    system.scheduler.join_queue(player("b", "EU", 60, 20)).await.unwrap();

    let first = system.scheduler.run_pass().await;
    assert_eq!(first.failed_commits, 1);
    assert!(first.matches.is_empty());
    assert_eq!(system.store.range_all("queue:EU:newbie").await.unwrap().len(), 2);
    assert_eq!(system.status("a").await, PlayerMatchStatus::Waiting);

    let second = system.scheduler.run_pass().await;
    assert_eq!(second.matches.len(), 1);
    assert_eq!(ledger.attempts(), 2);
    assert_eq!(ledger.match_count(), 1);
    assert!(system.store.is_empty("queue:EU:newbie"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_consumer_is_dropped_without_stalling_others() {
    let system = TestSystem::new();
    system.registry.add_player("m1", "fast").unwrap();
    system.registry.add_player("m1", "slow").unwrap();

    let (fast, mut fast_rx) = Connection::new("m1", "fast", 64);
    let (slow, mut slow_rx) = Connection::new("m1", "slow", 1);
    system.hub.register(fast).unwrap();
    system.hub.register(slow).unwrap();

    // Four ticks at 50ms
    tokio::time::sleep(Duration::from_millis(210)).await;

    assert_eq!(system.hub.connection_count("m1").await.unwrap(), 1);
    assert_eq!(system.hub.stats().await.unwrap().dropped_unresponsive, 1);

    let mut fast_frames = 0;
    while fast_rx.try_recv().is_ok() {
        fast_frames += 1;
    }
    assert!(fast_frames >= 4, "fast consumer got {} frames", fast_frames);

    // The slow consumer keeps only what fit before it was dropped
    assert!(slow_rx.recv().await.is_some());
    assert!(slow_rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reaped_session_is_recreated_on_reconnect() {
    let session_settings = SessionSettings {
        idle_timeout_seconds: 60,
        ..Default::default()
    };
    let system = TestSystem::with(
        MatchmakingSettings::default(),
        session_settings,
        Arc::new(raceway::InMemoryMatchLedger::new()),
    );

    let first = system.registry.add_player("m1", "a").unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(system.registry.reap_idle().await.unwrap(), 1);
    assert!(system.registry.is_empty());

    // Let the stopped session task observe its shutdown
    tokio::task::yield_now().await;
    assert!(first.snapshot().await.is_err());

    let second = system.registry.add_player("m1", "a").unwrap();
    let snapshot = second.snapshot().await.unwrap();
    assert_eq!(snapshot.players.len(), 1);
    assert_eq!(system.registry.len(), 1);
}
