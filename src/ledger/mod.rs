//! Durable match bookkeeping
//!
//! The match ledger records committed matches and each player's status. Match
//! creation is atomic: the match row, both participant rows and both players'
//! status flip happen together or not at all.

pub mod sqlite;

use crate::error::{MatchmakingError, Result};
use crate::types::{MatchId, MatchRecord, Player, PlayerId, PlayerMatchStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub use sqlite::SqliteMatchLedger;

/// Trait for the durable store backing match creation and status lookups
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatchLedger: Send + Sync {
    /// Record a player as waiting (re-joining resets a matched player to waiting)
    async fn register_player(&self, player: &Player) -> Result<()>;

    /// Atomically create the match and mark both participants matched
    async fn create_match(&self, record: &MatchRecord) -> Result<()>;

    /// Look up a player's current status
    async fn player_status(&self, player_id: &str) -> Result<PlayerMatchStatus>;

    /// Remove every row (local/dev cleanup)
    async fn clear(&self) -> Result<()>;

    /// Cheap reachability probe for health checks
    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct LedgerTables {
    players: HashMap<PlayerId, PlayerMatchStatus>,
    matches: HashMap<MatchId, MatchRecord>,
}

/// In-process ledger for tests and local runs
#[derive(Debug)]
pub struct InMemoryMatchLedger {
    tables: Mutex<LedgerTables>,
    available: AtomicBool,
}

impl Default for InMemoryMatchLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMatchLedger {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(LedgerTables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the database rejecting writes (or recovering)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Look up a committed match
    pub fn get_match(&self, match_id: &str) -> Option<MatchRecord> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.matches.get(match_id).cloned())
    }

    /// Number of committed matches
    pub fn match_count(&self) -> usize {
        self.tables
            .lock()
            .map(|tables| tables.matches.len())
            .unwrap_or(0)
    }

    fn lock_tables(&self) -> Result<std::sync::MutexGuard<'_, LedgerTables>> {
        self.tables.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire ledger lock".to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl MatchLedger for InMemoryMatchLedger {
    async fn register_player(&self, player: &Player) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(MatchmakingError::LedgerUnavailable {
                message: "in-memory ledger is offline".to_string(),
            }
            .into());
        }

        self.lock_tables()?
            .players
            .insert(player.id.clone(), PlayerMatchStatus::Waiting);
        Ok(())
    }

    async fn create_match(&self, record: &MatchRecord) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(MatchmakingError::LedgerCommitFailed {
                match_id: record.id.clone(),
                message: "in-memory ledger is offline".to_string(),
            }
            .into());
        }

        let mut tables = self.lock_tables()?;
        if tables.matches.contains_key(&record.id) {
            return Err(MatchmakingError::LedgerCommitFailed {
                match_id: record.id.clone(),
                message: "match already exists".to_string(),
            }
            .into());
        }

        for player_id in &record.players {
            tables.players.insert(
                player_id.clone(),
                PlayerMatchStatus::Matched {
                    match_id: record.id.clone(),
                },
            );
        }
        tables.matches.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn player_status(&self, player_id: &str) -> Result<PlayerMatchStatus> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(MatchmakingError::LedgerUnavailable {
                message: "in-memory ledger is offline".to_string(),
            }
            .into());
        }

        self.lock_tables()?
            .players
            .get(player_id)
            .cloned()
            .ok_or_else(|| {
                MatchmakingError::PlayerNotFound {
                    player_id: player_id.to_string(),
                }
                .into()
            })
    }

    async fn clear(&self) -> Result<()> {
        let mut tables = self.lock_tables()?;
        tables.players.clear();
        tables.matches.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(MatchmakingError::LedgerUnavailable {
                message: "in-memory ledger is offline".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
