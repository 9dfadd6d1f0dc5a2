//! Session registry
//!
//! A lock-protected map from match id to its running game session. Sessions
//! are created lazily on the first connection and retired by the idle reaper
//! once nobody has been connected for `idle_timeout`.

use crate::config::SessionSettings;
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::session::game::{GameSession, GameSessionHandle};
use crate::session::hub::HubHandle;
use crate::types::MatchId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

/// Registry of live game sessions, one per match id
pub struct SessionRegistry {
    sessions: Mutex<HashMap<MatchId, GameSessionHandle>>,
    hub: HubHandle,
    settings: SessionSettings,
    metrics_collector: Arc<MetricsCollector>,
}

impl SessionRegistry {
    pub fn new(
        hub: HubHandle,
        settings: SessionSettings,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            hub,
            settings,
            metrics_collector,
        }
    }

    fn lock_sessions(&self) -> Result<MutexGuard<'_, HashMap<MatchId, GameSessionHandle>>> {
        self.sessions.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire session registry lock".to_string(),
            }
            .into()
        })
    }

    /// Return the session for `match_id`, starting it if this is the first request
    ///
    /// Lookup, creation and insertion happen under one lock, so concurrent
    /// callers for an unseen match all get the same session. The session is
    /// touched before the lock is released, so a concurrent reaper pass
    /// re-checking idleness never removes a session that was just handed out.
    pub fn get_or_create(&self, match_id: &str) -> Result<GameSessionHandle> {
        let mut sessions = self.lock_sessions()?;

        if let Some(existing) = sessions.get(match_id) {
            if !existing.is_closed() {
                existing.touch();
                return Ok(existing.clone());
            }
            debug!("Replacing stopped session for match {}", match_id);
            self.metrics_collector.record_session_stopped();
        }

        let session = GameSession::spawn(
            match_id,
            &self.settings,
            self.hub.clone(),
            self.metrics_collector.clone(),
        );
        session.touch();
        sessions.insert(match_id.to_string(), session.clone());
        self.metrics_collector.record_session_created();

        info!("Created game session for match {}", match_id);
        Ok(session)
    }

    /// Seed a connecting player's car in the match's session
    pub fn add_player(&self, match_id: &str, player_id: &str) -> Result<GameSessionHandle> {
        let session = self.get_or_create(match_id)?;
        session.add_player(player_id)?;
        Ok(session)
    }

    pub fn get(&self, match_id: &str) -> Option<GameSessionHandle> {
        self.lock_sessions()
            .ok()
            .and_then(|sessions| sessions.get(match_id).cloned())
    }

    pub fn len(&self) -> usize {
        self.lock_sessions().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop and remove sessions idle past `idle_timeout` with no connections
    ///
    /// Returns how many sessions were reaped.
    pub async fn reap_idle(&self) -> Result<usize> {
        let idle_timeout = self.settings.idle_timeout();
        let candidates: Vec<MatchId> = self
            .lock_sessions()?
            .iter()
            .filter(|(_, session)| session.is_closed() || session.idle_for() >= idle_timeout)
            .map(|(match_id, _)| match_id.clone())
            .collect();

        let mut reaped = 0;
        for match_id in candidates {
            if self.hub.connection_count(&match_id).await? > 0 {
                continue;
            }

            // A connection may have arrived while the hub was being asked
            let removed = {
                let mut sessions = self.lock_sessions()?;
                let still_idle = sessions
                    .get(&match_id)
                    .is_some_and(|s| s.is_closed() || s.idle_for() >= idle_timeout);
                if still_idle {
                    sessions.remove(&match_id)
                } else {
                    None
                }
            };

            if let Some(session) = removed {
                session.shutdown();
                self.metrics_collector.record_session_reaped();
                info!(
                    "Reaped idle session for match {} (idle {:?})",
                    match_id,
                    session.idle_for()
                );
                reaped += 1;
            }
        }

        Ok(reaped)
    }

    /// Run `reap_idle` every `every` until shutdown
    pub fn spawn_reaper(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.reap_idle().await {
                            Ok(0) => {}
                            Ok(count) => debug!("Reaper removed {} sessions", count),
                            Err(e) => error!("Session reaper failed: {}", e),
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Session reaper shutdown signal received");
                        break;
                    }
                }
            }
        })
    }

    /// Stop every session
    pub fn shutdown_all(&self) -> Result<usize> {
        let sessions: Vec<GameSessionHandle> =
            self.lock_sessions()?.drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.shutdown();
            self.metrics_collector.record_session_stopped();
        }
        info!("Stopped {} game sessions", sessions.len());
        Ok(sessions.len())
    }
}
