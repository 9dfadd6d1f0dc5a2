//! Pairing rules and queue classification
//!
//! This module decides whether two queued players may be paired and maps a
//! player's skill rating onto the tier and queue they wait in.

use crate::config::MatchmakingSettings;
use crate::types::{LatencyPolicy, Player, Tier};
use crate::utils::skill_difference;
use tracing::debug;

/// Skill thresholds (exclusive upper bounds) for the lower tiers
const NEWBIE_CEILING: i64 = 500;
const SPECIALIST_CEILING: i64 = 700;
const EXPERT_CEILING: i64 = 900;

/// Default maximum skill difference for a pairing
pub const DEFAULT_MAX_SKILL_GAP: i64 = 100;

/// Map a skill rating to its tier
pub fn tier_for_skill(skill: i64) -> Tier {
    if skill < NEWBIE_CEILING {
        Tier::Newbie
    } else if skill < SPECIALIST_CEILING {
        Tier::Specialist
    } else if skill < EXPERT_CEILING {
        Tier::Expert
    } else {
        Tier::CandidateMaster
    }
}

/// Queue store key for a region and tier, e.g. `queue:US:newbie`
pub fn queue_key(region: &str, tier: Tier) -> String {
    format!("queue:{}:{}", region, tier)
}

/// Queue store key a player is enqueued under
pub fn queue_key_for(player: &Player) -> String {
    queue_key(&player.region, tier_for_skill(player.skill))
}

/// Trait for pairing rules used by the scheduler
pub trait PairingRule: Send + Sync {
    /// Whether `first` and `second` (in ascending-skill scan order) may be paired
    fn can_pair(&self, first: &Player, second: &Player) -> bool;
}

/// Region, skill-gap and latency rule
///
/// Under the default directional policy the latency check is ordered: it only
/// passes when the first player of the pair (the lower-skill one during a scan)
/// has latency no higher than the second. Swapping the arguments can change
/// the answer.
#[derive(Debug, Clone)]
pub struct CompatibilityRule {
    max_skill_gap: i64,
    latency_policy: LatencyPolicy,
    max_latency_gap: i64,
}

impl CompatibilityRule {
    /// Directional rule with the given skill gap
    pub fn new(max_skill_gap: i64) -> Self {
        Self {
            max_skill_gap,
            latency_policy: LatencyPolicy::Directional,
            max_latency_gap: 0,
        }
    }

    /// Symmetric rule: latencies may differ by at most `max_latency_gap`
    pub fn symmetric(max_skill_gap: i64, max_latency_gap: i64) -> Self {
        Self {
            max_skill_gap,
            latency_policy: LatencyPolicy::Symmetric,
            max_latency_gap,
        }
    }

    pub fn from_settings(settings: &MatchmakingSettings) -> Self {
        Self {
            max_skill_gap: settings.max_skill_gap,
            latency_policy: settings.latency_policy,
            max_latency_gap: settings.max_latency_gap,
        }
    }

    pub fn max_skill_gap(&self) -> i64 {
        self.max_skill_gap
    }

    pub fn latency_policy(&self) -> LatencyPolicy {
        self.latency_policy
    }

    fn latency_compatible(&self, first: &Player, second: &Player) -> bool {
        match self.latency_policy {
            LatencyPolicy::Directional => first.latency <= second.latency,
            LatencyPolicy::Symmetric => {
                (first.latency - second.latency).abs() <= self.max_latency_gap
            }
        }
    }
}

impl Default for CompatibilityRule {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SKILL_GAP)
    }
}

impl PairingRule for CompatibilityRule {
    fn can_pair(&self, first: &Player, second: &Player) -> bool {
        if first.region != second.region {
            debug!(
                "'{}' and '{}' are in different regions ({} vs {})",
                first.id, second.id, first.region, second.region
            );
            return false;
        }

        let gap = skill_difference(first.skill, second.skill);
        if gap > self.max_skill_gap {
            debug!(
                "'{}' and '{}' have a skill gap of {} (max {})",
                first.id, second.id, gap, self.max_skill_gap
            );
            return false;
        }

        if !self.latency_compatible(first, second) {
            debug!(
                "'{}' and '{}' fail the {} latency check ({}ms vs {}ms)",
                first.id, second.id, self.latency_policy, first.latency, second.latency
            );
            return false;
        }

        debug!(
            "Compatible pair: '{}' vs '{}' - gap: {}, region: {}",
            first.id, second.id, gap, first.region
        );
        true
    }
}
