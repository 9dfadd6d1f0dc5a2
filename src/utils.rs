//! Utility functions for the matchmaking service

use chrono::Utc;
use uuid::Uuid;

/// Current time as unix seconds
pub fn unix_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Build a match id from the two participants and the creation time
pub fn generate_match_id(first: &str, second: &str, created_at: i64) -> String {
    format!("{}-{}-{}", first, second, created_at)
}

/// Generate a new unique connection ID
pub fn generate_connection_id() -> Uuid {
    Uuid::new_v4()
}

/// Calculate the absolute difference between two skill ratings
pub fn skill_difference(skill1: i64, skill2: i64) -> i64 {
    (skill1 - skill2).abs()
}
