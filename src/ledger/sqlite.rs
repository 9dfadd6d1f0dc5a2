//! SQLite match ledger
//!
//! Uses an sqlx pool; the schema is created on connect. `create_match` runs in a
//! single transaction that is rolled back on any failure.

use crate::error::{MatchmakingError, Result};
use crate::ledger::MatchLedger;
use crate::matchmaking::compatibility::tier_for_skill;
use crate::types::{MatchRecord, Player, PlayerMatchStatus};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS players (
        id TEXT PRIMARY KEY,
        mmr INTEGER,
        ping INTEGER,
        region TEXT NOT NULL,
        tier TEXT,
        status TEXT NOT NULL DEFAULT 'waiting',
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS matches (
        id TEXT PRIMARY KEY,
        region TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS matches_players (
        match_id TEXT NOT NULL REFERENCES matches(id),
        player_id TEXT NOT NULL,
        PRIMARY KEY (match_id, player_id)
    )",
];

/// Match ledger stored in SQLite
#[derive(Debug, Clone)]
pub struct SqliteMatchLedger {
    pool: SqlitePool,
}

impl SqliteMatchLedger {
    /// Open (creating if missing) the database at `url` and ensure the schema exists
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| MatchmakingError::ConfigurationError {
                message: format!("Invalid ledger database URL {}: {}", url, e),
            })?
            .create_if_missing(true);

        // An in-memory database only lives as long as its single connection
        let in_memory = url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| MatchmakingError::LedgerUnavailable {
                message: format!("Failed to open ledger database: {}", e),
            })?;

        let ledger = Self { pool };
        ledger.migrate().await?;

        info!("Match ledger ready at {}", url);
        Ok(ledger)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| MatchmakingError::LedgerUnavailable {
                    message: format!("Failed to create ledger schema: {}", e),
                })?;
        }
        Ok(())
    }

    async fn commit_match(&self, record: &MatchRecord) -> std::result::Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO matches (id, region, status) VALUES (?, ?, 'matched')")
            .bind(&record.id)
            .bind(&record.region)
            .execute(&mut *tx)
            .await?;

        for player_id in &record.players {
            sqlx::query("INSERT INTO matches_players (match_id, player_id) VALUES (?, ?)")
                .bind(&record.id)
                .bind(player_id)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                "INSERT INTO players (id, region, status) VALUES (?, ?, 'matched')
                 ON CONFLICT(id) DO UPDATE SET status = 'matched'",
            )
            .bind(player_id)
            .bind(&record.region)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }
}

fn unavailable(e: sqlx::Error) -> anyhow::Error {
    MatchmakingError::LedgerUnavailable {
        message: e.to_string(),
    }
    .into()
}

#[async_trait]
impl MatchLedger for SqliteMatchLedger {
    async fn register_player(&self, player: &Player) -> Result<()> {
        sqlx::query(
            "INSERT INTO players (id, mmr, ping, region, tier, status, created_at)
             VALUES (?, ?, ?, ?, ?, 'waiting', datetime(?, 'unixepoch'))
             ON CONFLICT(id) DO UPDATE SET
                mmr = excluded.mmr,
                ping = excluded.ping,
                region = excluded.region,
                tier = excluded.tier,
                status = 'waiting'",
        )
        .bind(&player.id)
        .bind(player.skill)
        .bind(player.latency)
        .bind(&player.region)
        .bind(tier_for_skill(player.skill).as_str())
        .bind(player.joined_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        debug!("Registered player '{}' as waiting", player.id);
        Ok(())
    }

    async fn create_match(&self, record: &MatchRecord) -> Result<()> {
        self.commit_match(record).await.map_err(|e| {
            MatchmakingError::LedgerCommitFailed {
                match_id: record.id.clone(),
                message: e.to_string(),
            }
            .into()
        })
    }

    async fn player_status(&self, player_id: &str) -> Result<PlayerMatchStatus> {
        let status: Option<(String,)> = sqlx::query_as("SELECT status FROM players WHERE id = ?")
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        let Some((status,)) = status else {
            return Err(MatchmakingError::PlayerNotFound {
                player_id: player_id.to_string(),
            }
            .into());
        };

        if status == "waiting" {
            return Ok(PlayerMatchStatus::Waiting);
        }

        let (match_id,): (String,) = sqlx::query_as(
            "SELECT match_id FROM matches_players WHERE player_id = ? ORDER BY rowid DESC LIMIT 1",
        )
        .bind(player_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(PlayerMatchStatus::Matched { match_id })
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        for table in ["matches_players", "matches", "players"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
        }
        tx.commit().await.map_err(unavailable)?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
