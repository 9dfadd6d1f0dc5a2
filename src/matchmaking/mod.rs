//! Matchmaking: queue classification, pairing rules, queue stores and the
//! notification-driven scheduler.

pub mod compatibility;
pub mod redis_store;
pub mod scheduler;
pub mod store;

pub use compatibility::{
    queue_key, queue_key_for, tier_for_skill, CompatibilityRule, PairingRule,
};
pub use redis_store::{RedisQueueStore, RedisStoreConfig};
pub use scheduler::{MatchScheduler, PassSummary, QueueScan, SchedulerStats, NEW_PLAYER_EVENT};
pub use store::{InMemoryQueueStore, Notifications, QueueStore, RESUBSCRIBED_EVENT};
