//! Raceway - matchmaking and real-time relay for racing games
//!
//! This crate queues players per region and skill tier, pairs compatible
//! players into ledger-backed matches, and runs a fixed-rate game session per
//! match whose snapshots are broadcast to every connected player.

pub mod config;
pub mod error;
pub mod ledger;
pub mod matchmaking;
pub mod metrics;
pub mod service;
pub mod session;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use ledger::{InMemoryMatchLedger, MatchLedger, SqliteMatchLedger};
pub use matchmaking::{CompatibilityRule, InMemoryQueueStore, MatchScheduler, QueueStore};
pub use session::{BroadcastHub, HubHandle, SessionRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
