//! Error types for the matchmaking and session service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking and session scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Invalid request: {reason}")]
    ValidationError { reason: String },

    #[error("Queue store unavailable: {message}")]
    QueueUnavailable { message: String },

    #[error("Match ledger commit failed for {match_id}: {message}")]
    LedgerCommitFailed { match_id: String, message: String },

    #[error("Match ledger unavailable: {message}")]
    LedgerUnavailable { message: String },

    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("Game session closed: {match_id}")]
    SessionClosed { match_id: String },

    #[error("Broadcast hub is not running")]
    HubClosed,

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Shorthand for a validation failure
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationError {
            reason: reason.into(),
        }
    }

    /// Shorthand for a queue store failure
    pub fn queue_unavailable(message: impl std::fmt::Display) -> Self {
        Self::QueueUnavailable {
            message: message.to_string(),
        }
    }
}
