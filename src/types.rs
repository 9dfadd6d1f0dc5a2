//! Common types used throughout the matchmaking and session service

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Unique identifier for players
pub type PlayerId = String;

/// Unique identifier for matches, also the key of a game session
pub type MatchId = String;

/// Skill bucket used to partition the matchmaking queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Newbie,
    Specialist,
    Expert,
    CandidateMaster,
}

impl Tier {
    /// Every tier, lowest first
    pub const ALL: [Tier; 4] = [
        Tier::Newbie,
        Tier::Specialist,
        Tier::Expert,
        Tier::CandidateMaster,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Newbie => "newbie",
            Tier::Specialist => "specialist",
            Tier::Expert => "expert",
            Tier::CandidateMaster => "candidate_master",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Player information for matchmaking
///
/// The wire names (`mmr`, `ping`) are what clients send in the join request
/// and what is stored as the queue member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    #[serde(rename = "mmr")]
    pub skill: i64,
    pub region: String,
    #[serde(rename = "ping")]
    pub latency: i64,
    /// Unix timestamp (seconds) of the join request
    #[serde(default)]
    pub joined_at: i64,
}

/// Status of a committed match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchState {
    Matched,
}

/// A committed pairing of exactly two players
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub players: [PlayerId; 2],
    pub region: String,
    pub status: MatchState,
}

/// A player's position in the matchmaking lifecycle, as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PlayerMatchStatus {
    Waiting,
    Matched { match_id: MatchId },
}

/// Per-player car state inside a game session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarState {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub speed: f64,
    pub acceleration: f64,
    #[serde(rename = "maxSpeed")]
    pub max_speed: f64,
    pub friction: f64,
    pub angle: f64,
    pub damaged: bool,
}

impl CarState {
    /// Car state assigned to a player when they first connect to a session
    pub fn starting_grid() -> Self {
        Self {
            width: 20.0,
            height: 40.0,
            acceleration: 0.1,
            max_speed: 10.0,
            friction: 0.05,
            ..Default::default()
        }
    }
}

/// Input frame sent by a connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    #[serde(default)]
    pub player_id: PlayerId,
    #[serde(default)]
    pub action: String,
    pub payload: CarState,
}

/// Full session state pushed to every connection of a match on each tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub match_id: MatchId,
    pub tick: u64,
    pub players: BTreeMap<PlayerId, CarState>,
}

/// Who is trusted with car positions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustModel {
    /// Client-reported position, speed and angle are applied as-is
    #[default]
    ClientAuthoritative,
    /// Only control inputs (speed, angle) are accepted; positions belong to the simulation
    ServerAuthoritative,
}

impl FromStr for TrustModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "client-authoritative" | "client" => Ok(TrustModel::ClientAuthoritative),
            "server-authoritative" | "server" => Ok(TrustModel::ServerAuthoritative),
            other => Err(format!("unknown trust model: {}", other)),
        }
    }
}

impl std::fmt::Display for TrustModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustModel::ClientAuthoritative => write!(f, "client-authoritative"),
            TrustModel::ServerAuthoritative => write!(f, "server-authoritative"),
        }
    }
}

/// How the pairing rule compares the latencies of two adjacent queued players
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LatencyPolicy {
    /// The lower-skill player must not have higher latency than the higher-skill one
    #[default]
    Directional,
    /// Latencies may differ by at most the configured gap, in either order
    Symmetric,
}

impl FromStr for LatencyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "directional" => Ok(LatencyPolicy::Directional),
            "symmetric" => Ok(LatencyPolicy::Symmetric),
            other => Err(format!("unknown latency policy: {}", other)),
        }
    }
}

impl std::fmt::Display for LatencyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LatencyPolicy::Directional => write!(f, "directional"),
            LatencyPolicy::Symmetric => write!(f, "symmetric"),
        }
    }
}
