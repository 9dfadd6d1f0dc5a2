//! Game session configuration

use crate::types::TrustModel;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Real-time session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Tick period in milliseconds (50ms = 20Hz)
    pub tick_interval_ms: u64,
    /// Outbound snapshot buffer per connection
    pub outbound_buffer: usize,
    /// Sessions without connections idle this long are reaped
    pub idle_timeout_seconds: u64,
    /// How often the reaper runs
    pub reap_interval_seconds: u64,
    /// Who owns car positions
    pub trust_model: TrustModel,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            outbound_buffer: 256,
            idle_timeout_seconds: 300,
            reap_interval_seconds: 30,
            trust_model: TrustModel::ClientAuthoritative,
        }
    }
}

impl SessionSettings {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow!("Tick interval must be greater than 0"));
        }
        if self.outbound_buffer == 0 {
            return Err(anyhow!("Outbound buffer must hold at least one snapshot"));
        }
        if self.idle_timeout_seconds == 0 || self.reap_interval_seconds == 0 {
            return Err(anyhow!("Session idle timeout and reap interval must be positive"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}
