//! Game session tick loop
//!
//! A session is a task that owns one match's tick counter and car states.
//! Timer fires, player inputs and snapshot requests all go through one
//! `select!`, so state is never mutated from two places at once. Every tick the
//! full state is serialized and pushed to the hub, which fans it out without
//! making the loop wait on slow clients.

use crate::config::SessionSettings;
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::session::hub::HubHandle;
use crate::types::{CarState, MatchId, PlayerId, PlayerInput, SessionSnapshot, TrustModel};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

enum SessionCommand {
    AddPlayer(PlayerId),
    Input(PlayerInput),
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Cloneable handle to a running game session
#[derive(Clone)]
pub struct GameSessionHandle {
    match_id: MatchId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    shutdown: broadcast::Sender<()>,
    last_activity: Arc<Mutex<Instant>>,
}

impl GameSessionHandle {
    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| {
            MatchmakingError::SessionClosed {
                match_id: self.match_id.clone(),
            }
            .into()
        })
    }

    /// Seed the player's car on the starting grid (kept as-is if already present)
    pub fn add_player(&self, player_id: impl Into<PlayerId>) -> Result<()> {
        self.touch();
        self.send(SessionCommand::AddPlayer(player_id.into()))
    }

    /// Hand an input frame to the session; inputs for unknown players are ignored
    pub fn apply_input(&self, input: PlayerInput) -> Result<()> {
        self.touch();
        self.send(SessionCommand::Input(input))
    }

    /// Current tick and car states
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Snapshot(reply))?;
        response.await.map_err(|_| {
            MatchmakingError::SessionClosed {
                match_id: self.match_id.clone(),
            }
            .into()
        })
    }

    /// Record activity now
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    /// Time since the last recorded activity
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// Ask the tick loop to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Whether the tick loop has exited
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// State owned by the session task
pub struct GameSession {
    match_id: MatchId,
    tick: u64,
    players: BTreeMap<PlayerId, CarState>,
    trust_model: TrustModel,
    hub: HubHandle,
    metrics_collector: Arc<MetricsCollector>,
}

impl GameSession {
    /// Create the session and start its tick loop
    pub fn spawn(
        match_id: impl Into<MatchId>,
        settings: &SessionSettings,
        hub: HubHandle,
        metrics_collector: Arc<MetricsCollector>,
    ) -> GameSessionHandle {
        let match_id = match_id.into();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let session = Self {
            match_id: match_id.clone(),
            tick: 0,
            players: BTreeMap::new(),
            trust_model: settings.trust_model,
            hub,
            metrics_collector,
        };
        tokio::spawn(session.run(settings.tick_interval(), commands_rx, shutdown_rx));

        GameSessionHandle {
            match_id,
            commands: commands_tx,
            shutdown: shutdown_tx,
            last_activity: Arc::new(Mutex::new(Instant::now())),
        }
    }

    async fn run(
        mut self,
        period: Duration,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            "Game session {} started ({}ms tick, {})",
            self.match_id,
            period.as_millis(),
            self.trust_model
        );
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick() {
                        warn!("Game session {} cannot publish snapshots: {}", self.match_id, e);
                        break;
                    }
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }

        info!("Game session {} stopped at tick {}", self.match_id, self.tick);
    }

    fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::AddPlayer(player_id) => {
                debug!("Player '{}' joined session {}", player_id, self.match_id);
                self.players
                    .entry(player_id)
                    .or_insert_with(CarState::starting_grid);
            }
            SessionCommand::Input(input) => {
                let outcome = if self.apply_input(&input) {
                    "applied"
                } else {
                    "ignored"
                };
                self.metrics_collector.record_input(outcome);
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn tick(&mut self) -> Result<()> {
        self.tick += 1;
        self.advance();
        self.metrics_collector.record_tick();

        let frame = serde_json::to_string(&self.snapshot()).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize snapshot: {}", e),
            }
        })?;
        self.hub.broadcast(&self.match_id, frame)
    }

    /// Physics placeholder: only the server-authoritative mode moves cars
    fn advance(&mut self) {
        if self.trust_model != TrustModel::ServerAuthoritative {
            return;
        }
        for car in self.players.values_mut() {
            car.x += car.speed * car.angle.sin();
            car.y -= car.speed * car.angle.cos();
        }
    }

    /// Last write wins on the fields the trust model lets the client set
    fn apply_input(&mut self, input: &PlayerInput) -> bool {
        let Some(car) = self.players.get_mut(&input.player_id) else {
            debug!(
                "Ignoring input for unknown player '{}' in session {}",
                input.player_id, self.match_id
            );
            return false;
        };

        let reported = &input.payload;
        match self.trust_model {
            TrustModel::ClientAuthoritative => {
                car.x = reported.x;
                car.y = reported.y;
                car.speed = reported.speed;
                car.angle = reported.angle;
            }
            TrustModel::ServerAuthoritative => {
                let limit = car.max_speed.abs();
                car.speed = reported.speed.clamp(-limit, limit);
                car.angle = reported.angle;
            }
        }
        true
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            match_id: self.match_id.clone(),
            tick: self.tick,
            players: self.players.clone(),
        }
    }
}
