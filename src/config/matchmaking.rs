//! Matchmaking configuration

use crate::types::LatencyPolicy;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Matchmaking-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Regions with a queue per tier; the scheduler scans exactly these
    pub regions: Vec<String>,
    /// Maximum skill difference between paired players
    pub max_skill_gap: i64,
    /// How adjacent players' latencies are compared
    pub latency_policy: LatencyPolicy,
    /// Maximum latency difference under the symmetric policy (ms)
    pub max_latency_gap: i64,
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            regions: vec!["US".to_string(), "EU".to_string(), "ASIA".to_string()],
            max_skill_gap: 100,
            latency_policy: LatencyPolicy::Directional,
            max_latency_gap: 50,
        }
    }
}

impl MatchmakingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(anyhow!("At least one matchmaking region is required"));
        }
        if self.regions.iter().any(|r| r.is_empty() || r.contains(':')) {
            return Err(anyhow!("Region names must be non-empty and contain no ':'"));
        }
        if self.max_skill_gap < 0 {
            return Err(anyhow!("Max skill gap cannot be negative"));
        }
        if self.max_latency_gap < 0 {
            return Err(anyhow!("Max latency gap cannot be negative"));
        }
        Ok(())
    }

    /// Whether a region is served by the scheduler
    pub fn knows_region(&self, region: &str) -> bool {
        self.regions.iter().any(|r| r == region)
    }
}
