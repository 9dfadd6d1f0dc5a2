//! Configuration management for the raceway service
//!
//! This module handles configuration loading from environment variables and
//! TOML files, validation, and default values.

pub mod app;
pub mod matchmaking;
pub mod session;

// Re-export commonly used types
pub use app::{validate_config, AppConfig, LedgerSettings, QueueStoreSettings, ServiceSettings};
pub use matchmaking::MatchmakingSettings;
pub use session::SessionSettings;
