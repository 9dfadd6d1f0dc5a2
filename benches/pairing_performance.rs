//! Performance benchmarks for pairing and scheduler passes

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use raceway::config::MatchmakingSettings;
use raceway::ledger::InMemoryMatchLedger;
use raceway::matchmaking::{CompatibilityRule, InMemoryQueueStore, MatchScheduler, PairingRule};
use raceway::types::{CarState, Player, SessionSnapshot};
use std::collections::BTreeMap;
use std::sync::Arc;

fn bench_player(i: usize) -> Player {
    Player {
        id: format!("player_{}", i),
        skill: (i % 500) as i64,
        region: "US".to_string(),
        latency: 10 + (i % 90) as i64,
        joined_at: 0,
    }
}

fn create_bench_scheduler() -> MatchScheduler {
    MatchScheduler::new(
        Arc::new(InMemoryQueueStore::new()),
        Arc::new(InMemoryMatchLedger::new()),
        &MatchmakingSettings::default(),
        "matchmaking_channel",
    )
}

fn bench_compatibility_rule(c: &mut Criterion) {
    let rule = CompatibilityRule::new(100);
    let first = bench_player(10);
    let second = bench_player(40);

    c.bench_function("compatibility_check", |b| {
        b.iter(|| black_box(rule.can_pair(black_box(&first), black_box(&second))))
    });
}

fn bench_scheduler_pass(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("scheduler_pass");

    for queued in [10usize, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(queued), &queued, |b, &queued| {
            b.iter(|| {
                rt.block_on(async {
                    let scheduler = create_bench_scheduler();
                    for i in 0..queued {
                        let _ = scheduler.join_queue(bench_player(i)).await;
                    }

                    black_box(scheduler.run_pass().await)
                })
            })
        });
    }

    group.finish();
}

fn bench_snapshot_encoding(c: &mut Criterion) {
    let players: BTreeMap<String, CarState> = (0..8)
        .map(|i| (format!("player_{}", i), CarState::starting_grid()))
        .collect();
    let snapshot = SessionSnapshot {
        match_id: "a-b-1700000000".to_string(),
        tick: 1200,
        players,
    };

    c.bench_function("snapshot_encoding_8_players", |b| {
        b.iter(|| black_box(serde_json::to_string(black_box(&snapshot))))
    });
}

criterion_group!(
    benches,
    bench_compatibility_rule,
    bench_scheduler_pass,
    bench_snapshot_encoding
);
criterion_main!(benches);
