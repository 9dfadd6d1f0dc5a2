//! Broadcast hub
//!
//! One task owns the match-id to connection-set map. Everything else talks to
//! it through [`HubHandle`], so register, unregister and broadcast for a match
//! are totally ordered and no caller takes a lock.
//!
//! Every connection owns a bounded outbound buffer. A broadcast never waits:
//! when a connection's buffer is full the connection is considered
//! unresponsive, its buffer is closed and it is removed on the spot.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::types::{MatchId, PlayerId};
use crate::utils::generate_connection_id;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique identifier for one real-time connection
pub type ConnectionId = Uuid;

/// Serialized frame shared by every recipient of a broadcast
pub type Payload = Arc<str>;

/// Receiving half of a connection's outbound buffer, drained by its writer
pub type Outbound = mpsc::Receiver<Payload>;

/// A registered client connection
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub match_id: MatchId,
    pub player_id: PlayerId,
    sender: mpsc::Sender<Payload>,
}

impl Connection {
    /// Create a connection with an outbound buffer of `capacity` frames
    pub fn new(
        match_id: impl Into<MatchId>,
        player_id: impl Into<PlayerId>,
        capacity: usize,
    ) -> (Self, Outbound) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: generate_connection_id(),
            match_id: match_id.into(),
            player_id: player_id.into(),
            sender,
        };
        (connection, receiver)
    }
}

/// Snapshot of hub counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub matches: usize,
    pub connections: usize,
    pub broadcasts: u64,
    pub dropped_unresponsive: u64,
}

enum HubCommand {
    Register(Connection),
    Unregister {
        match_id: MatchId,
        connection_id: ConnectionId,
    },
    Broadcast {
        match_id: MatchId,
        payload: Payload,
    },
    ConnectionCount {
        match_id: MatchId,
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Cloneable handle to the hub task
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    fn send(&self, command: HubCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| MatchmakingError::HubClosed.into())
    }

    /// Add a connection to its match's set
    pub fn register(&self, connection: Connection) -> Result<()> {
        self.send(HubCommand::Register(connection))
    }

    /// Remove a connection and close its outbound buffer
    pub fn unregister(&self, match_id: &str, connection_id: ConnectionId) -> Result<()> {
        self.send(HubCommand::Unregister {
            match_id: match_id.to_string(),
            connection_id,
        })
    }

    /// Queue `payload` for every connection of `match_id`; never waits on consumers
    pub fn broadcast(&self, match_id: &str, payload: impl Into<Payload>) -> Result<()> {
        self.send(HubCommand::Broadcast {
            match_id: match_id.to_string(),
            payload: payload.into(),
        })
    }

    /// Number of connections currently registered for `match_id`
    pub async fn connection_count(&self, match_id: &str) -> Result<usize> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::ConnectionCount {
            match_id: match_id.to_string(),
            reply,
        })?;
        response.await.map_err(|_| MatchmakingError::HubClosed.into())
    }

    pub async fn stats(&self) -> Result<HubStats> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::Stats { reply })?;
        response.await.map_err(|_| MatchmakingError::HubClosed.into())
    }
}

/// The hub task state
pub struct BroadcastHub {
    connections: HashMap<MatchId, HashMap<ConnectionId, Connection>>,
    commands: mpsc::UnboundedReceiver<HubCommand>,
    stats: HubStats,
    metrics_collector: Arc<MetricsCollector>,
}

impl BroadcastHub {
    /// Start the hub task
    ///
    /// The task stops when every handle is dropped or `shutdown` fires.
    pub fn spawn(
        metrics_collector: Arc<MetricsCollector>,
        shutdown: broadcast::Receiver<()>,
    ) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            connections: HashMap::new(),
            commands: rx,
            stats: HubStats::default(),
            metrics_collector,
        };

        let task = tokio::spawn(hub.run(shutdown));
        (HubHandle { commands: tx }, task)
    }

    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Broadcast hub started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = shutdown.recv() => {
                    info!("Broadcast hub shutdown signal received");
                    break;
                }
            }
        }

        // Dropping the senders closes every outbound buffer
        let remaining: usize = self.connections.values().map(HashMap::len).sum();
        self.connections.clear();
        info!("Broadcast hub stopped, closed {} connections", remaining);
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(connection) => self.register(connection),
            HubCommand::Unregister {
                match_id,
                connection_id,
            } => self.unregister(&match_id, connection_id),
            HubCommand::Broadcast { match_id, payload } => self.broadcast(&match_id, payload),
            HubCommand::ConnectionCount { match_id, reply } => {
                let count = self.connections.get(&match_id).map_or(0, HashMap::len);
                let _ = reply.send(count);
            }
            HubCommand::Stats { reply } => {
                let stats = HubStats {
                    matches: self.connections.len(),
                    connections: self.connections.values().map(HashMap::len).sum(),
                    ..self.stats.clone()
                };
                let _ = reply.send(stats);
            }
        }
    }

    fn register(&mut self, connection: Connection) {
        debug!(
            "Registering connection {} for player '{}' in match {}",
            connection.id, connection.player_id, connection.match_id
        );
        self.metrics_collector.record_connection_registered();
        self.connections
            .entry(connection.match_id.clone())
            .or_default()
            .insert(connection.id, connection);
    }

    fn unregister(&mut self, match_id: &str, connection_id: ConnectionId) {
        if self.remove(match_id, connection_id).is_some() {
            debug!("Unregistered connection {} from match {}", connection_id, match_id);
            self.metrics_collector.record_connection_dropped("closed");
        }
    }

    fn broadcast(&mut self, match_id: &str, payload: Payload) {
        let Some(set) = self.connections.get(match_id) else {
            return;
        };
        self.stats.broadcasts += 1;

        let mut dropped = Vec::new();
        for (id, connection) in set {
            match connection.sender.try_send(payload.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => dropped.push((*id, "unresponsive")),
                Err(TrySendError::Closed(_)) => dropped.push((*id, "closed")),
            }
        }

        for (id, reason) in dropped {
            if let Some(connection) = self.remove(match_id, id) {
                if reason == "unresponsive" {
                    self.stats.dropped_unresponsive += 1;
                    warn!(
                        "Dropping unresponsive connection {} (player '{}') from match {}",
                        id, connection.player_id, match_id
                    );
                } else {
                    debug!("Removing closed connection {} from match {}", id, match_id);
                }
                self.metrics_collector.record_connection_dropped(reason);
            }
        }
    }

    /// Remove one connection, deleting the match's set once it is empty
    fn remove(&mut self, match_id: &str, connection_id: ConnectionId) -> Option<Connection> {
        let set = self.connections.get_mut(match_id)?;
        let removed = set.remove(&connection_id);
        if set.is_empty() {
            self.connections.remove(match_id);
        }
        removed
    }
}
