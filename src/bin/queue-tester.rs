//! Queue Tester CLI Tool
//!
//! Command-line tool for exercising the matchmaking queues against the real
//! Redis queue store and SQLite ledger a running service uses.
//!
//! Usage:
//!   cargo run --bin queue-tester -- --help
//!   cargo run --bin queue-tester join --id "p1" --region US --mmr 650 --ping 40
//!   cargo run --bin queue-tester burst --count 50 --region EU
//!   cargo run --bin queue-tester status --id "p1"
//!   cargo run --bin queue-tester stats

use anyhow::Result;
use clap::{Parser, Subcommand};
use raceway::config::AppConfig;
use raceway::ledger::{MatchLedger, SqliteMatchLedger};
use raceway::matchmaking::{MatchScheduler, QueueStore, RedisQueueStore, RedisStoreConfig};
use raceway::types::{Player, PlayerMatchStatus};
use raceway::utils::unix_timestamp;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "queue-tester")]
#[command(about = "Queue testing tool for raceway matchmaking against real Redis and SQLite")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Redis URL for the queue store
    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Ledger database URL
    #[arg(long, default_value = "sqlite://raceway.db")]
    database_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a single player
    Join {
        #[arg(short, long)]
        id: String,
        #[arg(short, long, default_value = "US")]
        region: String,
        #[arg(short, long, default_value = "650")]
        mmr: i64,
        #[arg(short, long, default_value = "40")]
        ping: i64,
    },
    /// Queue many synthetic players spread across the tiers
    Burst {
        #[arg(short, long, default_value = "20")]
        count: usize,
        #[arg(short, long, default_value = "US")]
        region: String,
        /// Prefix for generated player ids
        #[arg(long, default_value = "synthetic")]
        prefix: String,
    },
    /// Show a player's match status
    Status {
        #[arg(short, long)]
        id: String,
    },
    /// Wait until a player is matched or the timeout passes
    Watch {
        #[arg(short, long)]
        id: String,
        /// Timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },
    /// Wake the service's matchmaker for a pass
    Pass,
    /// Show waiting entries per queue
    Stats,
    /// Empty every queue
    Clear,
}

/// Spread synthetic players over the skill range with varied latency
fn synthetic_player(prefix: &str, region: &str, index: usize) -> Player {
    Player {
        id: format!("{}-{}", prefix, index),
        skill: ((index * 137) % 1500) as i64,
        region: region.to_string(),
        latency: 10 + ((index * 29) % 120) as i64,
        joined_at: unix_timestamp(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    println!("🔌 Connecting to queue store at: {}", cli.redis_url);
    let store: Arc<dyn QueueStore> = match RedisQueueStore::connect(RedisStoreConfig {
        url: cli.redis_url.clone(),
        max_retries: 1,
        ..Default::default()
    })
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("❌ Failed to connect to Redis: {}", e);
            std::process::exit(1);
        }
    };

    let ledger: Arc<dyn MatchLedger> =
        match SqliteMatchLedger::connect(&cli.database_url, config.ledger.max_connections).await {
            Ok(ledger) => Arc::new(ledger),
            Err(e) => {
                eprintln!("❌ Failed to open ledger {}: {}", cli.database_url, e);
                std::process::exit(1);
            }
        };

    let scheduler = MatchScheduler::new(
        store.clone(),
        ledger,
        &config.matchmaking,
        config.queue_store.notification_channel.clone(),
    );

    match cli.command {
        Commands::Join {
            id,
            region,
            mmr,
            ping,
        } => {
            let player = Player {
                id: id.clone(),
                skill: mmr,
                region,
                latency: ping,
                joined_at: unix_timestamp(),
            };
            match scheduler.join_queue(player).await {
                Ok(()) => {
                    println!("✅ Queued '{}'", id);
                    println!("💡 Use 'watch --id {}' to see when a match forms", id);
                }
                Err(e) => {
                    eprintln!("❌ Failed to queue '{}': {}", id, e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Burst {
            count,
            region,
            prefix,
        } => {
            let mut queued = 0;
            for index in 0..count {
                match scheduler
                    .join_queue(synthetic_player(&prefix, &region, index))
                    .await
                {
                    Ok(()) => queued += 1,
                    Err(e) => eprintln!("❌ {}-{}: {}", prefix, index, e),
                }
            }
            println!("✅ Queued {}/{} synthetic players in {}", queued, count, region);
        }

        Commands::Status { id } => match scheduler.player_status(&id).await {
            Ok(PlayerMatchStatus::Waiting) => println!("⏳ '{}' is waiting", id),
            Ok(PlayerMatchStatus::Matched { match_id }) => {
                println!("🏁 '{}' matched in {}", id, match_id)
            }
            Err(e) => {
                eprintln!("❌ {}", e);
                std::process::exit(1);
            }
        },

        Commands::Watch { id, timeout } => {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout);
            loop {
                if let Ok(PlayerMatchStatus::Matched { match_id }) =
                    scheduler.player_status(&id).await
                {
                    println!("🏁 '{}' matched in {}", id, match_id);
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    println!("❌ '{}' still waiting after {}s", id, timeout);
                    std::process::exit(1);
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }

        Commands::Pass => match scheduler.request_pass().await {
            Ok(()) => println!(
                "🔁 Requested a pass on '{}'",
                config.queue_store.notification_channel
            ),
            Err(e) => {
                eprintln!("❌ Failed to request a pass: {}", e);
                std::process::exit(1);
            }
        },

        Commands::Stats => {
            println!("📊 Queue Statistics:");
            let mut total = 0;
            for queue in scheduler.queue_keys() {
                let waiting = store.range_all(&queue).await?.len();
                total += waiting;
                if waiting > 0 {
                    println!("  {}: {}", queue, waiting);
                }
            }
            println!("  Total waiting: {}", total);
        }

        Commands::Clear => {
            scheduler.clear_queues().await?;
            println!("🧹 Cleared {} queues", scheduler.queue_keys().len());
        }
    }

    Ok(())
}
